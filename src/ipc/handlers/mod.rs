/// Unwraps a handler step or returns its error response.
macro_rules! tri {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(resp) => return resp,
        }
    };
}

pub mod audit;
pub mod core;
pub mod fees;
pub mod grades;
pub mod registry;
