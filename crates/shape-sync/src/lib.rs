//! Shape-aware transfer for trees that repeat the same structure.
//!
//! A tree's shape is hashed into a short [`StructureId`]. The first transfer
//! of a shape carries its definition; later transfers carry only the leaf
//! values in shape order, or just the leaves a request touched.
//!
//! ```
//! use serde_json::json;
//! use shape_sync::{EncodeContext, KnownStructures, PacketType, SyncProtocol, Value};
//!
//! let protocol = SyncProtocol::default();
//! let mut server = protocol.new_session();
//! let mut client = protocol.new_session();
//!
//! let first = Value::from(json!({"id": 1, "name": "ada"}));
//! let packet = protocol.encode(&first, &EncodeContext::default(), &mut server).unwrap();
//! assert_eq!(packet.packet_type, PacketType::Full);
//! assert_eq!(protocol.decode(&packet, &mut client).unwrap(), first);
//!
//! let second = Value::from(json!({"id": 2, "name": "grace"}));
//! let known = KnownStructures::single(packet.structure_id.clone());
//! let packet = protocol.encode(&second, &EncodeContext::new(known), &mut server).unwrap();
//! assert_eq!(packet.packet_type, PacketType::ValuesOnly);
//! assert_eq!(protocol.decode(&packet, &mut client).unwrap(), second);
//! ```

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod packet;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod shape;
pub mod size;
pub mod tracker;
pub mod value;

pub use config::{NegotiationMode, SyncConfig};
pub use context::RequestContext;
pub use error::{Result, SyncError};
pub use packet::{Packet, PacketMetadata, PacketType};
pub use protocol::{EncodeContext, KnownStructures, SyncProtocol};
pub use registry::{RegistrySnapshot, SharedRegistry, StructureRegistry};
pub use session::Session;
pub use shape::{Shape, StructureDefinition, StructureId, PRIMITIVE_STRUCTURE_ID};
pub use size::SizeReport;
pub use tracker::{AccessHooks, AccessPattern, AccessTracker, Mutation, Tracked, TrackedId};
pub use value::{deep_equal, ErrorValue, Opaque, Value};
