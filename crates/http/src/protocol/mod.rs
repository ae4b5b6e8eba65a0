//! Protocol types shared by the codecs, server and client: message heads,
//! payload items and the error taxonomy.

mod error;
mod message;
mod request;
mod response;

pub use error::{ClientError, HttpError, ParseError, SendError};
pub use message::{Message, PayloadItem, PayloadSize};
pub use request::RequestHeader;
pub use response::ResponseHead;
