use crate::backup::function_path;
use crate::backup::plugin::{Plugin, PluginContext};
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bon::Builder;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;
use validator::Validate;

/// Mails the run status, with the run log as body.
///
/// Supports SSL, StartTLS and unsecured connections. Credentials are optional
/// for relays that accept anonymous submission.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct SmtpPlugin {
    #[validate(length(min = 1))]
    #[builder(into)]
    host: String,
    #[serde(default)]
    #[builder(default, into)]
    smtp_mode: SmtpMode,
    #[builder(into)]
    from: Mailbox,
    #[validate(length(min = 1))]
    #[builder(into)]
    to: Vec<Mailbox>,
    #[builder(into)]
    username: Option<String>,
    #[validate(nested)]
    #[builder(into)]
    password: Option<RedactedString>,
}

/// SMTP connection security modes
///
/// - `Unsecured`: Plain text connection (not recommended for production)
/// - `Ssl`: SSL/TLS encrypted connection from start
/// - `StartTls`: Start with plain text, then upgrade to TLS
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpMode {
    Unsecured,
    Ssl,
    #[default]
    StartTls,
}

impl SmtpPlugin {
    #[named]
    pub fn send<D1: Display, D2: Display>(&self, subject: D1, body: D2) -> Result<()> {
        tracing::info!("Mailing run status from {:?} to {:?}", self.from, self.to);
        let email = self
            .to
            .iter()
            .fold(Message::builder(), |email, send_to| {
                email.to(send_to.clone())
            })
            .from(self.from.clone())
            .subject(subject.to_string())
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(Error::from)
            .add_msg(format!(
                "Fail to build email from {:?} to {:?}",
                self.from, self.to
            ))
            .add_fn_name(function_path!())?;

        let builder = match self.smtp_mode {
            SmtpMode::Unsecured => Ok(SmtpTransport::builder_dangerous(self.host.as_str())),
            SmtpMode::Ssl => SmtpTransport::relay(self.host.as_str()),
            SmtpMode::StartTls => SmtpTransport::starttls_relay(self.host.as_str()),
        }
        .map_err(Error::from)
        .add_msg(format!(
            "Failed to build smtp client for host: {:?} with mode {:?}",
            self.host, self.smtp_mode
        ))
        .add_fn_name(function_path!())?;
        let mailer = match (&self.username, &self.password) {
            (Some(username), Some(password)) => builder
                .credentials(Credentials::new(
                    username.clone(),
                    password.inner().to_string(),
                ))
                .build(),
            _ => builder.build(),
        };

        let response = mailer
            .send(&email)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        if response.is_positive() {
            Ok(())
        } else {
            let error_vec = response
                .message()
                .map(|m| Error::smtp_send_error(m.to_owned()))
                .collect_vec();
            Err(Error::lots_of_error(error_vec))
        }
    }
}

impl Plugin for SmtpPlugin {
    fn exec(&self, target: &Path, ctx: &PluginContext) -> Result<()> {
        let body = read_log(target);
        self.send(ctx.subject, body)
    }
}

/// Run log contents, or a note when it cannot be read.
pub(crate) fn read_log(log: &Path) -> String {
    match std::fs::read(log) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => format!("Run log {:?} unavailable: {e}", log),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::plugin::tests::tools_in;

    fn config(host: String, mode: SmtpMode, to: Vec<Mailbox>) -> SmtpPlugin {
        SmtpPlugin::builder()
            .host(host)
            .smtp_mode(mode)
            .from("backup@example.com".parse::<Mailbox>().unwrap())
            .to(to)
            .username("testuser")
            .password(RedactedString::builder().inner("testpass").build())
            .build()
    }

    #[test]
    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    fn test_smtp_plugin_mails_log() {
        use std::env;

        // Skip if running in CI or without network
        if env::var("CI").is_ok() {
            return;
        }

        let server = maik::MockServer::builder().no_verify_credentials().build();
        let temp = tempfile::TempDir::new().unwrap();
        let log = temp.path().join("host_backup.log");
        std::fs::write(&log, "INFO archived /etc").unwrap();
        let plugin = config(
            format!("{}:{}", server.host(), server.port()),
            SmtpMode::Unsecured,
            vec!["ops@example.com".parse::<Mailbox>().unwrap()],
        );

        server.start();
        std::thread::sleep(std::time::Duration::from_millis(100));

        let tools = tools_in(None, None);
        let result = plugin.exec(
            &log,
            &PluginContext {
                tools: &tools,
                hostname: "web1",
                subject: "Backup of web1 completed successfully",
            },
        );

        std::thread::sleep(std::time::Duration::from_millis(200));

        if result.is_ok() {
            let assertion = maik::MailAssertion::new()
                .recipients_are(["ops@example.com"])
                .body_is("INFO archived /etc");
            assert!(server.assert(assertion));
        }
    }

    #[test]
    fn test_smtp_plugin_validation() {
        let valid = config(
            "smtp.example.com".into(),
            SmtpMode::Ssl,
            vec!["ops@example.com".parse::<Mailbox>().unwrap()],
        );
        assert!(valid.validate().is_ok());

        let invalid = config("smtp.example.com".into(), SmtpMode::Ssl, vec![]);
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_smtp_descriptor() {
        let plugin: SmtpPlugin = serde_yml::from_str(
            "host: smtp.example.com\nfrom: backup@example.com\nto: [ops@example.com]\n",
        )
        .unwrap();
        assert_eq!(*plugin.smtp_mode(), SmtpMode::StartTls);
        assert!(plugin.password().is_none());
    }

    #[test]
    fn test_read_log_missing() {
        assert!(read_log(Path::new("/nonexistent/host_backup.log")).contains("unavailable"));
    }
}
