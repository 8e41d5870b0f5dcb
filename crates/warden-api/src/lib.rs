// Warden admin API
// Decision: Handlers map 1:1 to kernel operations; validation of enum strings
//           happens at the HTTP boundary, everything else in the kernel

pub mod api;
pub mod openapi;
pub mod state;

pub use openapi::ApiDoc;
pub use state::ApiState;
