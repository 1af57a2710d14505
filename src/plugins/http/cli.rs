use crate::plugins::registry::{CliPlugin, UploadCliConfig};
use clap::{Arg, ArgAction, ArgMatches, Command};

pub struct HttpCliPlugin;

impl HttpCliPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl CliPlugin for HttpCliPlugin {
    fn name(&self) -> &'static str {
        "http"
    }

    fn augment_upload_command(&self, cmd: Command) -> Command {
        cmd.arg(
            Arg::new("http_header")
                .long("header")
                .help_heading("HTTP")
                .help("Extra HTTP header sent with every request (repeatable), e.g. --header 'Authorization: Bearer xxx'")
                .action(ArgAction::Append)
                .num_args(1),
        )
        .arg(
            Arg::new("http_user_agent")
                .long("user-agent")
                .help_heading("HTTP")
                .help("HTTP User-Agent")
                .default_value("OrangeUploader/0.1")
                .num_args(1),
        )
        .arg(
            Arg::new("http_timeout_secs")
                .long("timeout-secs")
                .help_heading("HTTP")
                .help("Per-request timeout in seconds")
                .default_value("60")
                .num_args(1),
        )
    }

    fn apply_upload_matches(&self, matches: &ArgMatches, cfg: &mut UploadCliConfig) -> anyhow::Result<()> {
        if let Some(ua) = matches.get_one::<String>("http_user_agent") {
            cfg.driver_ctx.user_agent = ua.clone();
        }
        if let Some(s) = matches.get_one::<String>("http_timeout_secs") {
            cfg.driver_ctx.timeout_secs = s.parse()?;
        }

        if let Some(values) = matches.get_many::<String>("http_header") {
            for h in values {
                let (k, v) = h
                    .split_once(':')
                    .ok_or_else(|| anyhow::anyhow!("invalid header format: {}", h))?;
                cfg.headers.insert(k.trim().to_string(), v.trim().to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<UploadCliConfig> {
        let plugin = HttpCliPlugin::new();
        let cmd = plugin.augment_upload_command(Command::new("upload"));
        let m = cmd.try_get_matches_from(args)?;
        let mut cfg = UploadCliConfig::default();
        plugin.apply_upload_matches(&m, &mut cfg)?;
        Ok(cfg)
    }

    #[test]
    fn collects_headers_and_driver_settings() {
        let cfg = parse(&[
            "upload",
            "--header",
            "Authorization: Bearer abc",
            "--header",
            "X-Tenant:42",
            "--timeout-secs",
            "15",
        ])
        .unwrap();
        assert_eq!(cfg.headers.get("Authorization").map(String::as_str), Some("Bearer abc"));
        assert_eq!(cfg.headers.get("X-Tenant").map(String::as_str), Some("42"));
        assert_eq!(cfg.driver_ctx.timeout_secs, 15);
        assert_eq!(cfg.driver_ctx.user_agent, "OrangeUploader/0.1");
    }

    #[test]
    fn rejects_header_without_colon() {
        assert!(parse(&["upload", "--header", "broken"]).is_err());
    }
}
