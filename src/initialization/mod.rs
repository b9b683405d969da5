//! Process-level initialization helpers.

mod logger;

pub use logger::init_logger_with;

use std::time::Duration;

use crate::error_handling::InitializationError;

/// Builds the shared HTTP client used by remote sources.
///
/// One bounded timeout per request; the fusion deadline further caps each
/// in-flight call.
pub fn init_remote_client(timeout: Duration) -> Result<reqwest::Client, InitializationError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(InitializationError::HttpClientError)?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_remote_client() {
        let client = init_remote_client(Duration::from_secs(3));
        assert!(client.is_ok());
    }
}
