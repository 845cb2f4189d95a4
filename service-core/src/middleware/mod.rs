pub mod tracing;

pub use self::tracing::{REQUEST_ID_HEADER, RequestId, make_request_span, request_id_middleware};
