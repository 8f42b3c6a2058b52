//! Domain model (IDs, descriptor, status, task kinds, errors).

pub mod descriptor;
pub mod errors;
pub mod ids;
pub mod status;
pub mod task_kind;

pub use self::descriptor::{
    DescriptorError, FIELD_CONTENT, FIELD_ENTITY_ID, FIELD_RETRY_COUNT, StreamFields,
    TaskDescriptor,
};
pub use self::errors::{EnqueueError, HandlerError, StatusStoreError, TransportError};
pub use self::ids::{ConsumerName, EntityId, MessageId};
pub use self::status::{MAX_ERROR_LEN, StatusRecord, TaskStatus, truncate_error};
pub use self::task_kind::{TaskKind, UnknownTaskKind};
