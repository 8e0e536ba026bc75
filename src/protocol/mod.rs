mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

mod request;
pub use request::Request;

mod response;
pub(crate) use response::ResponseBuffer;
pub use response::ResponseWriter;

mod body;
pub use body::Body;

mod multipart;
pub use multipart::MultipartReader;
pub use multipart::Part;
