use crate::body::BodySource;
use crate::error::OssError;
use crate::response::Response;

pub use crate::request::blocking::ConnBackend as DefaultBackend;

/// The body is borrowed for one attempt only; the transport rearms it
/// before lending it to the next one.
pub type BackendRequestBody<'a> = &'a mut BodySource;

/// A simplified version of tower_service::Service without async
pub trait SyncService<R> {
    type Response;
    type Error;

    fn call(&mut self, _: R) -> Result<Self::Response, Self::Error>;
}

pub trait Backend:
    for<'a> SyncService<
        http::Request<BackendRequestBody<'a>>,
        Response = Response,
        Error: Into<OssError>,
    > + Clone
{
}

impl<T> Backend for T where
    for<'a> T: SyncService<
            http::Request<BackendRequestBody<'a>>,
            Response = Response,
            Error: Into<OssError>,
        > + Clone
{
}
