//! Wire-level and client-identity constants used during the handshake.

/// `client_properties` advertised in `Connection.StartOk`.
pub const PLATFORM: &str = "rust";
pub const PRODUCT: &str = "amqp-engine";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const INFORMATION: &str = "https://github.com/amqp-engine/amqp-engine";

pub const AUTH_MECHANISM: &str = "AMQPLAIN";
pub const LOCALE: &str = "en_US";

pub const DEFAULT_PLAIN_PORT: u16 = 5672;
pub const DEFAULT_TLS_PORT: u16 = 5671;

pub const DEFAULT_USERNAME: &str = "guest";
pub const DEFAULT_PASSWORD: &str = "guest";
pub const DEFAULT_VIRTUAL_HOST: &str = "/";

/// Channel id 0 is reserved for `Connection`-level methods.
pub const CONNECTION_CHANNEL_ID: u16 = 0;

/// Channel ids are allocated densely in `1..=MAX_CHANNEL_ID`.
pub const MAX_CHANNEL_ID: u16 = u16::MAX;
