//! Adapters between the generic admin-panel contracts and the backend
//!
//! Each provider takes the shared backend client at construction and holds no
//! other state between calls.

pub mod auth;
pub mod data;
pub mod live;

pub use auth::{AuthProvider, CheckResponse, LoginResponse, LogoutResponse, OnErrorResponse, Permissions};
pub use data::{CustomRequest, DataProvider};
pub use live::{ActionFilter, ChangeAction, ChangeEvent, LiveParams, LiveProvider, LiveSubscription};
