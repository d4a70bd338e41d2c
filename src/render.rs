//! Renders per-channel messages for events the pipeline creates itself.

use std::collections::HashMap;

use anyhow::{Error, Result};
use chrono::Utc;
use serde_json::{Value, json};

use crate::models::{
    event::{Event, ReceiverType},
    message::{
        BrowserMessage, EmailMessage, OpsGenieMessage, SlackAttachment, SlackMessage,
        StackdriverMessage,
    },
};

pub const TEST_EVENT_TYPE: &str = "user_test";
pub const TEST_EVENT_TEXT: &str = "A test event triggered from the notification service!";

const SETTINGS_PATH: &str = "notifications";
const ALERTS_PATH: &str = "monitor";
const DEPLOY_PATH: &str = "deploy";

/// Links into the tenant's UI referenced from rendered messages.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceLinks {
    pub settings: String,
    pub page: Option<PageLink>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLink {
    pub url: String,
    pub text: String,
}

impl InstanceLinks {
    /// Alert events link to the monitor page, deployment events to the deploy page.
    pub fn for_event(ui_url: &str, instance_id: &str, event_type: &str) -> Self {
        let base = format!("{}/{}", ui_url.trim_end_matches('/'), instance_id);

        let page = match event_type {
            "monitor" => Some(PageLink {
                url: format!("{}/{}", base, ALERTS_PATH),
                text: "View firing alerts".to_string(),
            }),
            "sync" | "policy" | "deploy" | "auto_deploy" | "deploy_commit" | "auto_deploy_commit" => {
                Some(PageLink {
                    url: format!("{}/{}", base, DEPLOY_PATH),
                    text: "View deployments".to_string(),
                })
            }
            _ => None,
        };

        Self {
            settings: format!("{}/{}", base, SETTINGS_PATH),
            page,
        }
    }
}

/// The event behind "send test notification": one message for every channel
/// a tenant can configure without extra payload data.
pub fn test_event(instance_id: &str, instance_name: &str, links: &InstanceLinks) -> Result<Event, Error> {
    let slack = SlackMessage {
        text: TEST_EVENT_TEXT.to_string(),
        ..Default::default()
    };

    let mut messages = HashMap::new();
    messages.insert(
        ReceiverType::Email.to_string(),
        email(&escape_html(TEST_EVENT_TEXT), TEST_EVENT_TYPE, instance_name, &links.settings)?,
    );
    messages.insert(
        ReceiverType::Slack.to_string(),
        slack_message(slack.clone(), instance_name, &links.settings)?,
    );
    messages.insert(
        ReceiverType::Browser.to_string(),
        browser(slack, TEST_EVENT_TYPE, None)?,
    );
    messages.insert(
        ReceiverType::Stackdriver.to_string(),
        stackdriver(json!(TEST_EVENT_TEXT), TEST_EVENT_TYPE, instance_name)?,
    );
    messages.insert(
        ReceiverType::Opsgenie.to_string(),
        opsgenie(TEST_EVENT_TEXT, TEST_EVENT_TYPE, instance_name)?,
    );

    Ok(Event {
        id: String::new(),
        event_type: TEST_EVENT_TYPE.to_string(),
        instance_id: instance_id.to_string(),
        instance_name: instance_name.to_string(),
        timestamp: Utc::now(),
        messages,
        text: Some(TEST_EVENT_TEXT.to_string()),
        metadata: HashMap::new(),
    })
}

/// Builds an event from a Slack-formatted webhook payload. `raw` is the body as
/// posted and becomes the Stackdriver payload unchanged. OpsGenie is only
/// rendered for alert events.
pub fn event_from_slack(
    message: SlackMessage,
    raw: Value,
    event_type: &str,
    instance_id: &str,
    instance_name: &str,
    links: &InstanceLinks,
) -> Result<Event, Error> {
    let html = slack_to_html(&message, instance_name, links.page.as_ref());
    let page_url = links
        .page
        .as_ref()
        .map_or(links.settings.as_str(), |page| page.url.as_str());

    let mut messages = HashMap::new();
    messages.insert(
        ReceiverType::Email.to_string(),
        email(&html, event_type, instance_name, &links.settings)?,
    );
    messages.insert(
        ReceiverType::Browser.to_string(),
        browser(message.clone(), event_type, links.page.as_ref())?,
    );
    messages.insert(
        ReceiverType::Stackdriver.to_string(),
        stackdriver(raw, event_type, instance_name)?,
    );
    if event_type == "monitor" {
        messages.insert(
            ReceiverType::Opsgenie.to_string(),
            opsgenie(&html, event_type, instance_name)?,
        );
    }

    let text = message.text.clone();
    messages.insert(
        ReceiverType::Slack.to_string(),
        slack_message(message, instance_name, page_url)?,
    );

    Ok(Event {
        id: String::new(),
        event_type: event_type.to_string(),
        instance_id: instance_id.to_string(),
        instance_name: instance_name.to_string(),
        timestamp: Utc::now(),
        messages,
        text: Some(text).filter(|t| !t.is_empty()),
        metadata: HashMap::new(),
    })
}

fn email(html: &str, event_type: &str, instance_name: &str, settings_link: &str) -> Result<Value, Error> {
    let footer = format!(
        r#"<p><span style="color: #8A8A8A; font-size: 8pt;">To disable these notifications, adjust the <a href="{}">Settings</a>.</span></p>"#,
        settings_link
    );

    Ok(serde_json::to_value(EmailMessage {
        subject: format!("{} - {}", instance_name, event_type),
        body: format!("{}{}", html, footer),
    })?)
}

fn slack_message(mut message: SlackMessage, instance_name: &str, link: &str) -> Result<Value, Error> {
    message.text = format!("*Instance*: <{}|{}>\n{}", link, instance_name, message.text);
    Ok(serde_json::to_value(message)?)
}

fn browser(message: SlackMessage, event_type: &str, page: Option<&PageLink>) -> Result<Value, Error> {
    let mut attachments = message.attachments;
    if let Some(page) = page {
        attachments.push(SlackAttachment {
            text: format!("[{}]({})", page.text, page.url),
            ..Default::default()
        });
    }

    Ok(serde_json::to_value(BrowserMessage {
        event_type: event_type.to_string(),
        text: message.text,
        attachments,
        timestamp: Utc::now(),
    })?)
}

fn stackdriver(payload: Value, event_type: &str, instance_name: &str) -> Result<Value, Error> {
    Ok(serde_json::to_value(StackdriverMessage {
        timestamp: Utc::now(),
        payload,
        labels: HashMap::from([
            ("instance".to_string(), instance_name.to_string()),
            ("event_type".to_string(), event_type.to_string()),
        ]),
    })?)
}

fn opsgenie(description: &str, event_type: &str, instance_name: &str) -> Result<Value, Error> {
    Ok(serde_json::to_value(OpsGenieMessage {
        message: format!("{} - {}", instance_name, event_type),
        description: Some(description.to_string()),
        tags: vec![instance_name.to_string(), event_type.to_string()],
        details: HashMap::from([
            ("instance".to_string(), instance_name.to_string()),
            ("event_type".to_string(), event_type.to_string()),
        ]),
        entity: Some("Notification Monitor".to_string()),
        source: Some("Notification Service".to_string()),
        ..Default::default()
    })?)
}

/// Flattens a Slack message and its attachments into single-line HTML.
pub fn slack_to_html(message: &SlackMessage, instance_name: &str, page: Option<&PageLink>) -> String {
    let mut paragraphs = vec![format!("Instance: {}", escape_html(instance_name))];

    if !message.text.is_empty() {
        paragraphs.push(slack_text_to_html(&message.text));
    }

    for attachment in &message.attachments {
        let lines: Vec<String> = [
            attachment.pretext.as_deref(),
            attachment.title.as_deref(),
            Some(attachment.text.as_str()),
        ]
        .into_iter()
        .flatten()
        .filter(|line| !line.is_empty())
        .map(slack_text_to_html)
        .collect();

        if !lines.is_empty() {
            paragraphs.push(lines.join("<br>"));
        }
    }

    if let Some(page) = page {
        paragraphs.push(format!(
            r#"<a href="{}">{}</a>"#,
            escape_html(&page.url),
            escape_html(&page.text)
        ));
    }

    paragraphs
        .iter()
        .map(|p| format!("<p>{}</p>", p))
        .collect::<String>()
}

/// Escapes text and turns Slack links (`<url|label>`) into anchors.
fn slack_text_to_html(text: &str) -> String {
    let mut html = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('<') {
        html.push_str(&escape_html(&rest[..start]));
        let candidate = &rest[start + 1..];

        match candidate.find('>') {
            Some(end) => {
                let inner = &candidate[..end];
                match inner.split_once('|') {
                    Some((url, label)) => html.push_str(&format!(
                        r#"<a href="{}">{}</a>"#,
                        escape_html(url),
                        escape_html(label)
                    )),
                    None => html.push_str(&format!(
                        r#"<a href="{0}">{0}</a>"#,
                        escape_html(inner)
                    )),
                }
                rest = &candidate[end + 1..];
            }
            None => {
                html.push_str(&escape_html(&rest[start..]));
                rest = "";
            }
        }
    }

    html.push_str(&escape_html(rest));
    html.replace('\n', "<br>")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
