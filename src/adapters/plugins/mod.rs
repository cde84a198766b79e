pub mod logging;
pub mod role_guard;

pub use logging::{LoggingPlugin, REQUEST_ID_HEADER};
pub use role_guard::RoleGuardPlugin;
