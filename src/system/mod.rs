//! Device-side helpers behind the REST routes: wifi configuration and
//! resource statistics.

pub mod stats;
pub mod wifi;
