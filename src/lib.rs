pub mod tps;

pub use tps::charset::Encoding;
pub use tps::error::TpsError;
pub use tps::field::FieldValue;
pub use tps::file::{OpenOptions, TpsFile};
pub use tps::table::{FieldDescriptor, FieldType, TableDefinition};
