// can: vendor CAN traffic to canonical telemetry signals.
//
// Everything here is pure computation over frames plus static tables: no
// bus I/O, no shared state. The reader thread owns the socket; the decoder
// is called from the aggregator tick with whatever frames arrived.

pub mod decoder;
pub mod signals;
pub mod vendor;

pub use decoder::{decode, decode_obd2, encode_raw};
pub use signals::{canonical, Endianness, SignalDefinition};
pub use vendor::{VendorDetector, VendorId};
