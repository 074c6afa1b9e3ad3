//! Session/profile bootstrap
//!
//! ## State machine
//!
//! ```text
//!                 login / stored credential
//!  Unauthenticated ───────────────────────▶ Authenticating
//!        ▲                                       │ identity known
//!        │ sign-out / logout                     ▼
//!        ├──────────────────────────── ProfileLoading(id, n)
//!        │                               │   │        ▲
//!        │                     profile ok│   │timeout │ n < max: n + 1
//!        │                               ▼   └────────┘
//!        ├──────────────────────── Authenticated(id, profile)
//!        │
//!        │                       n == max / not found
//!        └──────────────────────── ProfileFailed(id, reason)
//!                                        │ retry_profile_fetch
//!                                        ▼
//!                                ProfileLoading(id, 1)
//! ```
//!
//! A notification for the identity already held is ignored, so token
//! refreshes never trigger a refetch.

mod manager;
mod state;

pub use manager::SessionManager;
pub use state::{ProfileFailure, SessionState};
