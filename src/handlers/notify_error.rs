//! Turn an error log line into a chat alert.
use super::event::{self, LogData};
use super::Context;
use crate::stats::instrumented;
use anyhow::{anyhow, Result};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde_json::Value;
use tracing::{info, instrument};

const MESSAGE_LIMIT: usize = 100;

fn jst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("valid offset")
}

fn display_time(at: DateTime<FixedOffset>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.6f%:z").to_string()
}

/// Form-encode (space as `+`), as console fragments expect.
fn quote_plus(value: &str) -> String {
    urlencoding::encode(value).replace("%20", "+")
}

/// Console fragments are encoded twice with `%` spelled `$`.
fn console_escape(value: &str) -> String {
    quote_plus(&quote_plus(value)).replace('%', "$")
}

pub fn log_console_url(log: &LogData, request_id: Option<&str>, region: &str) -> String {
    let query = match request_id {
        Some(id) => format!("?filterPattern=\"{id}\""),
        None => format!("?start={}", log.timestamp),
    };
    format!(
        "https://{region}.console.aws.amazon.com/cloudwatch/home?region={region}\
         #logsV2:log-groups/log-group/{}/log-events/{}{}",
        console_escape(&log.log_group),
        console_escape(&log.log_stream),
        console_escape(&query),
    )
}

pub fn function_console_url(log: &LogData, region: &str) -> String {
    format!(
        "https://{region}.console.aws.amazon.com/lambda/home?region={region}#/functions/{}",
        log.log_group.replace("/aws/lambda/", "")
    )
}

/// Request id and message text of a log line. JSON lines carry
/// `lambda_request_id` and a `msg` list; anything else is used verbatim.
fn split_log_message(raw: &str) -> (Option<String>, String) {
    let Ok(Value::Object(data)) = serde_json::from_str::<Value>(raw) else {
        return (None, raw.to_string());
    };
    let request_id = data
        .get("lambda_request_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = match data.get("msg") {
        None => String::new(),
        Some(Value::Array(lines)) => lines
            .iter()
            .map(|line| match line {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::String(s)) => s.clone(),
        Some(_) => raw.to_string(),
    };
    (request_id, message)
}

/// Alert text for one log event, stamped with `now`.
pub fn build_message(log: &LogData, region: &str, now: DateTime<FixedOffset>) -> String {
    let tz = jst();
    let logged_at = tz
        .timestamp_millis_opt(log.timestamp)
        .single()
        .map(display_time)
        .unwrap_or_else(|| log.timestamp.to_string());

    let mut lines = vec![
        format!("<!here> ERROR ({})", display_time(now.with_timezone(&tz))),
        format!("LogGroup: `{}`", log.log_group),
        format!("LogStream: `{}`", log.log_stream),
        format!("timestamp: `{}`", log.timestamp),
        format!("datetime: `{logged_at}`"),
    ];

    let (request_id, message) = split_log_message(&log.message);
    if let Some(id) = &request_id {
        lines.push(format!("request id: `{id}`"));
    }
    lines.push(format!(
        "CloudWatch Logs: <{}|Link>",
        log_console_url(log, request_id.as_deref(), region)
    ));
    lines.push(format!("Lambda: <{}|Link>", function_console_url(log, region)));

    if message.chars().count() < MESSAGE_LIMIT {
        lines.extend(["message:".into(), "```".into(), message, "```".into()]);
    } else {
        let head: String = message.chars().take(MESSAGE_LIMIT).collect();
        lines.extend(["message (too long):".into(), "```".into(), head, "```".into()]);
    }
    lines.join("\n")
}

/// Returns the text that was sent.
#[instrument(skip_all)]
pub async fn handle(ctx: &Context, event: &Value) -> Result<String> {
    let log = event::log_data(event)?;
    let notifier = ctx
        .notifier
        .as_ref()
        .ok_or_else(|| anyhow!("no notification sink configured"))?;
    let text = build_message(&log, &ctx.config.notify.region, Utc::now().with_timezone(&jst()));
    instrumented(&ctx.stats, "post_message", notifier.notify(&text)).await?;
    info!(log_group = %log.log_group, "error notification sent");
    Ok(text)
}
