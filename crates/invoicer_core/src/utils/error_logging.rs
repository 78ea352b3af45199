//! Logging helpers for errors that are reported instead of returned

/// Log an error at ERROR level as a structured `error` field
///
/// The Debug rendering is used, so miette diagnostics keep their code.
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {
        tracing::error!(error = ?&$err, "unreported error")
    };
    ($msg:expr, $err:expr) => {
        tracing::error!(error = ?&$err, "{}", $msg)
    };
}

#[cfg(test)]
mod tests {
    use crate::error::AdapterError;

    #[test]
    #[tracing_test::traced_test]
    fn logs_message_and_error_field() {
        let err = AdapterError::Forbidden {
            message: "Only superusers can perform this action.".to_string(),
        };
        crate::log_error!("delete rejected", err);
        assert!(logs_contain("delete rejected"));
        assert!(logs_contain("error=Forbidden"));
        assert!(logs_contain("Only superusers"));
    }

    #[test]
    #[tracing_test::traced_test]
    fn bare_form_still_logs() {
        crate::log_error!(AdapterError::invalid_request("resource name must not be empty"));
        assert!(logs_contain("InvalidRequest"));
    }
}
