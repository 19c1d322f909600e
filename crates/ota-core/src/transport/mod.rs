//! Transport layer module.

pub mod btleplug_backend;
pub mod mock;
pub mod traits;

pub use btleplug_backend::{BtleplugCentral, BtleplugSession};
pub use mock::{MockCentral, MockOp, MockSession};
pub use traits::{
    CacheMode, CharProps, CharacteristicHandle, DiscoveredPeer, GattCentral, GattSession, PeerId,
    ServiceHandle, TransportError, WriteMode, WriteStatus,
};
