//! Delivery transports. Production goes through `aws ses send-email`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use volscale_core::CommandRunner;

use crate::{NotifyError, NotifyResult};

const SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// How a rendered report leaves the machine.
#[async_trait]
pub trait NotifyTransport: Send + Sync {
    async fn send_html(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        html: &str,
    ) -> NotifyResult<()>;
}

/// SES transport shelling out to the AWS CLI with a JSON request body.
pub struct SesCliTransport {
    runner: Arc<dyn CommandRunner>,
    region: Option<String>,
}

impl SesCliTransport {
    pub fn new(runner: Arc<dyn CommandRunner>, region: Option<String>) -> Self {
        Self { runner, region }
    }
}

#[async_trait]
impl NotifyTransport for SesCliTransport {
    async fn send_html(
        &self,
        sender: &str,
        recipients: &[String],
        subject: &str,
        html: &str,
    ) -> NotifyResult<()> {
        let request = serde_json::json!({
            "Source": sender,
            "Destination": { "ToAddresses": recipients },
            "Message": {
                "Subject": { "Data": subject, "Charset": "UTF-8" },
                "Body": { "Html": { "Data": html, "Charset": "UTF-8" } },
            },
        })
        .to_string();

        let mut args = vec!["ses", "send-email", "--cli-input-json", request.as_str()];
        if let Some(region) = &self.region {
            args.extend_from_slice(&["--region", region]);
        }

        let out = self.runner.run("aws", &args, SEND_TIMEOUT).await?;
        if !out.success() {
            return Err(NotifyError::Send(out.stderr.trim().to_string()));
        }
        debug!(recipients = recipients.len(), "ses send-email accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use volscale_core::{CmdError, CmdOutput};

    struct ReplayRunner {
        output: CmdOutput,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ReplayRunner {
        fn new(status: i32, stderr: &str) -> Self {
            Self {
                output: CmdOutput {
                    status_code: Some(status),
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                },
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for ReplayRunner {
        async fn run(
            &self,
            program: &str,
            args: &[&str],
            _timeout: Duration,
        ) -> Result<CmdOutput, CmdError> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().map(|s| s.to_string()));
            self.calls.lock().unwrap().push(call);
            Ok(self.output.clone())
        }
    }

    #[tokio::test]
    async fn send_builds_ses_request_json() {
        let runner = Arc::new(ReplayRunner::new(0, ""));
        let transport = SesCliTransport::new(runner.clone(), Some("eu-west-1".to_string()));

        transport
            .send_html(
                "ops@example.com",
                &["a@example.com".to_string(), "b@example.com".to_string()],
                "alert",
                "<html></html>",
            )
            .await
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        let call = &calls[0];
        assert_eq!(call[0], "aws");
        assert_eq!(call[1], "ses");
        assert_eq!(call[2], "send-email");

        let request: serde_json::Value = serde_json::from_str(&call[4]).unwrap();
        assert_eq!(request["Source"], "ops@example.com");
        assert_eq!(request["Destination"]["ToAddresses"][1], "b@example.com");
        assert_eq!(request["Message"]["Subject"]["Data"], "alert");
        assert!(call.contains(&"--region".to_string()));
    }

    #[tokio::test]
    async fn cli_failure_is_a_send_error() {
        let runner = Arc::new(ReplayRunner::new(255, "Email address is not verified"));
        let transport = SesCliTransport::new(runner, None);

        let err = transport
            .send_html("ops@example.com", &[], "alert", "<html></html>")
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Send(detail) if detail.contains("not verified")));
    }
}
