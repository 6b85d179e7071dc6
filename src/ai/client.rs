use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::ChatBackend;
use super::types::*;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, base_url: &str) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
        }
    }

    /// Send a streaming messages request.
    /// Parsed SSE events are sent to the returned channel; a broken stream
    /// shows up as an `Err` item.
    pub async fn stream_message(
        &self,
        request: CreateMessageRequest,
    ) -> Result<mpsc::Receiver<Result<StreamEvent>>> {
        let (tx, rx) = mpsc::channel(256);

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let is_anthropic = self.base_url.contains("anthropic.com");

        let mut req = self.http.post(&url);
        if is_anthropic {
            req = req
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION);
        } else {
            req = req.header("authorization", format!("Bearer {}", self.api_key));
        }

        let resp = req
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to AI API")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic API error {status}: {body}");
        }

        tokio::spawn(forward_events(resp.bytes_stream(), tx));
        Ok(rx)
    }
}

#[async_trait]
impl ChatBackend for AnthropicClient {
    async fn complete(&self, mut request: CreateMessageRequest) -> Result<AssistantTurn> {
        request.stream = true;
        let rx = self.stream_message(request).await?;
        fold_stream(rx).await
    }
}

/// Decode an SSE byte stream and forward its events until `message_stop`
/// or the first error.
async fn forward_events<S, B, E>(stream: S, tx: mpsc::Sender<Result<StreamEvent>>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut events = std::pin::pin!(stream.eventsource());
    while let Some(item) = events.next().await {
        let result = match item {
            Ok(event) => match parse_sse_event(&event.event, &event.data) {
                Some(parsed) => parsed,
                None => continue,
            },
            Err(e) => {
                warn!("SSE stream error: {e}");
                Err(anyhow!("AI stream broke off: {e}"))
            }
        };
        let last = matches!(result, Ok(StreamEvent::MessageStop) | Err(_));
        if tx.send(result).await.is_err() || last {
            return;
        }
    }
}

/// Collect streamed events into a complete assistant turn.
///
/// Fails unless the stream ends with `message_stop`: a partial reply is never
/// returned.
pub async fn fold_stream(mut rx: mpsc::Receiver<Result<StreamEvent>>) -> Result<AssistantTurn> {
    let mut turn = AssistantTurn::default();
    let mut current_text = String::new();
    let mut current_tool_json = String::new();
    let mut current_tool_block: Option<ContentBlock> = None;
    let mut saw_stop = false;

    while let Some(event) = rx.recv().await {
        match event? {
            StreamEvent::ContentBlockStart { content_block, .. } => {
                // Some proxies skip ContentBlockStop between blocks.
                flush_block(
                    &mut turn.content,
                    &mut current_text,
                    &mut current_tool_block,
                    &mut current_tool_json,
                );
                if let ContentBlock::Text { text } = &content_block {
                    current_text = text.clone();
                } else if matches!(content_block, ContentBlock::ToolUse { .. }) {
                    current_tool_block = Some(content_block);
                }
            }
            StreamEvent::TextDelta { text, .. } => current_text.push_str(&text),
            StreamEvent::InputJsonDelta { partial_json, .. } => {
                current_tool_json.push_str(&partial_json)
            }
            StreamEvent::ContentBlockStop { .. } => flush_block(
                &mut turn.content,
                &mut current_text,
                &mut current_tool_block,
                &mut current_tool_json,
            ),
            StreamEvent::MessageDelta { stop_reason } => turn.stop_reason = stop_reason,
            StreamEvent::MessageStop => {
                saw_stop = true;
                break;
            }
        }
    }

    if !saw_stop {
        anyhow::bail!("AI stream ended before message_stop");
    }
    flush_block(
        &mut turn.content,
        &mut current_text,
        &mut current_tool_block,
        &mut current_tool_json,
    );
    Ok(turn)
}

fn flush_block(
    content: &mut Vec<ContentBlock>,
    text: &mut String,
    tool_block: &mut Option<ContentBlock>,
    tool_json: &mut String,
) {
    if !text.is_empty() {
        content.push(ContentBlock::Text {
            text: std::mem::take(text),
        });
    }
    if let Some(mut block) = tool_block.take() {
        if let ContentBlock::ToolUse { ref mut input, .. } = block {
            if !tool_json.is_empty() {
                *input = serde_json::from_str(tool_json)
                    .unwrap_or(serde_json::Value::Object(Default::default()));
            }
        }
        content.push(block);
    }
    tool_json.clear();
}

/// Parse the payload of one SSE event. `None` for events that carry nothing
/// of interest, `Some(Err(..))` for an API `error` event.
fn parse_sse_event(event_type: &str, data: &str) -> Option<Result<StreamEvent>> {
    if data.is_empty() {
        return None;
    }

    let json: serde_json::Value = serde_json::from_str(data).ok()?;

    let event = match event_type {
        "content_block_start" => {
            let index = json["index"].as_u64()? as usize;
            let block = parse_content_block(&json["content_block"])?;
            StreamEvent::ContentBlockStart {
                index,
                content_block: block,
            }
        }
        "content_block_delta" => {
            let index = json["index"].as_u64()? as usize;
            let delta = &json["delta"];
            let delta_type = delta["type"].as_str()?;
            match delta_type {
                "text_delta" => StreamEvent::TextDelta {
                    index,
                    text: delta["text"].as_str()?.to_string(),
                },
                "input_json_delta" => StreamEvent::InputJsonDelta {
                    index,
                    partial_json: delta["partial_json"].as_str()?.to_string(),
                },
                _ => {
                    debug!("Unknown delta type: {delta_type}");
                    return None;
                }
            }
        }
        "content_block_stop" => {
            let index = json["index"].as_u64()? as usize;
            StreamEvent::ContentBlockStop { index }
        }
        "message_delta" => {
            let stop_reason = json["delta"]["stop_reason"]
                .as_str()
                .map(|s| s.to_string());
            StreamEvent::MessageDelta { stop_reason }
        }
        "message_stop" => StreamEvent::MessageStop,
        "error" => {
            let kind = json["error"]["type"].as_str().unwrap_or("error");
            let message = json["error"]["message"].as_str().unwrap_or("");
            return Some(Err(anyhow!("AI stream error {kind}: {message}")));
        }
        "message_start" | "ping" => return None,
        other => {
            debug!("Unknown SSE event type: {other}");
            return None;
        }
    };
    Some(Ok(event))
}

fn parse_content_block(val: &serde_json::Value) -> Option<ContentBlock> {
    match val["type"].as_str()? {
        "text" => Some(ContentBlock::Text {
            text: val["text"].as_str().unwrap_or("").to_string(),
        }),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: val["id"].as_str()?.to_string(),
            name: val["name"].as_str()?.to_string(),
            input: val["input"].clone(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: Vec<Vec<u8>>) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> {
        futures_util::stream::iter(parts.into_iter().map(Ok))
    }

    async fn collect(mut rx: mpsc::Receiver<Result<StreamEvent>>) -> Vec<Result<StreamEvent>> {
        let mut out = Vec::new();
        while let Some(e) = rx.recv().await {
            out.push(e);
        }
        out
    }

    const TEXT_START: &str = "event: content_block_start\n\
        data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n";
    const MESSAGE_STOP: &str = "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n";

    fn text_delta(text: &str) -> String {
        format!(
            "event: content_block_delta\n\
             data: {{\"type\":\"content_block_delta\",\"index\":0,\"delta\":{{\"type\":\"text_delta\",\"text\":\"{text}\"}}}}\n\n"
        )
    }

    #[test]
    fn parses_text_delta() {
        let data = "{\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"resource\"}}";
        match parse_sse_event("content_block_delta", data) {
            Some(Ok(StreamEvent::TextDelta { index, text })) => {
                assert_eq!(index, 0);
                assert_eq!(text, "resource");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn ignores_ping_and_blank_events() {
        assert!(parse_sse_event("ping", "{\"type\":\"ping\"}").is_none());
        assert!(parse_sse_event("message_stop", "").is_none());
    }

    #[test]
    fn parses_stop_reason() {
        let data = "{\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"}}";
        match parse_sse_event("message_delta", data) {
            Some(Ok(StreamEvent::MessageDelta { stop_reason })) => {
                assert_eq!(stop_reason.as_deref(), Some(STOP_REASON_TOOL_USE));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn error_event_is_an_error() {
        let data = "{\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}";
        let err = parse_sse_event("error", data).unwrap().unwrap_err();
        assert!(err.to_string().contains("overloaded_error"));
        assert!(err.to_string().contains("Overloaded"));
    }

    #[tokio::test]
    async fn multibyte_text_split_across_chunks_survives() {
        let body = format!("{TEXT_START}{}{MESSAGE_STOP}", text_delta("# VPC \u{2014} main"));
        let bytes = body.into_bytes();
        let dash = bytes
            .windows(3)
            .position(|w| w == "\u{2014}".as_bytes())
            .unwrap();
        let (head, tail) = bytes.split_at(dash + 1);

        let (tx, rx) = mpsc::channel(16);
        forward_events(chunks(vec![head.to_vec(), tail.to_vec()]), tx).await;
        let turn = fold_stream(rx).await.unwrap();
        assert_eq!(crate::protocol::text_of(&turn.content), "# VPC \u{2014} main");
    }

    #[tokio::test]
    async fn crlf_framed_events_are_parsed() {
        let body = format!("{TEXT_START}{}{MESSAGE_STOP}", text_delta("locals {}"))
            .replace('\n', "\r\n");
        let (tx, rx) = mpsc::channel(16);
        forward_events(chunks(vec![body.into_bytes()]), tx).await;
        let turn = fold_stream(rx).await.unwrap();
        assert_eq!(crate::protocol::text_of(&turn.content), "locals {}");
    }

    #[tokio::test]
    async fn connection_dropped_before_message_stop_fails() {
        let body = format!("{TEXT_START}{}", text_delta("resource \\\"aws_vpc\\\" \\\"main\\\" {"));
        let (tx, rx) = mpsc::channel(16);
        forward_events(chunks(vec![body.into_bytes()]), tx).await;
        let err = fold_stream(rx).await.unwrap_err();
        assert!(err.to_string().contains("message_stop"));
    }

    #[tokio::test]
    async fn transport_error_is_forwarded() {
        let parts: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(TEXT_START.as_bytes().to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer")),
        ];
        let (tx, rx) = mpsc::channel(16);
        forward_events(futures_util::stream::iter(parts), tx).await;
        let events = collect(rx).await;
        assert!(matches!(events.first(), Some(Ok(StreamEvent::ContentBlockStart { .. }))));
        let err = events.last().unwrap().as_ref().unwrap_err();
        assert!(err.to_string().contains("reset by peer"));
    }

    #[tokio::test]
    async fn error_event_mid_stream_fails_the_turn() {
        let body = format!(
            "{TEXT_START}{}event: error\n\
             data: {{\"type\":\"error\",\"error\":{{\"type\":\"api_error\",\"message\":\"boom\"}}}}\n\n",
            text_delta("partial")
        );
        let (tx, rx) = mpsc::channel(16);
        forward_events(chunks(vec![body.into_bytes()]), tx).await;
        let err = fold_stream(rx).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn folds_text_and_tool_use() {
        let (tx, rx) = mpsc::channel(16);
        let events = vec![
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: ContentBlock::Text { text: String::new() },
            },
            StreamEvent::TextDelta { index: 0, text: "Writing ".into() },
            StreamEvent::TextDelta { index: 0, text: "main.tf".into() },
            StreamEvent::ContentBlockStop { index: 0 },
            StreamEvent::ContentBlockStart {
                index: 1,
                content_block: ContentBlock::ToolUse {
                    id: "toolu_1".into(),
                    name: "create_file".into(),
                    input: serde_json::json!({}),
                },
            },
            StreamEvent::InputJsonDelta { index: 1, partial_json: "{\"filename\":".into() },
            StreamEvent::InputJsonDelta { index: 1, partial_json: "\"main.tf\"}".into() },
            StreamEvent::ContentBlockStop { index: 1 },
            StreamEvent::MessageDelta { stop_reason: Some(STOP_REASON_TOOL_USE.into()) },
            StreamEvent::MessageStop,
        ];
        for e in events {
            tx.send(Ok(e)).await.unwrap();
        }
        drop(tx);

        let turn = fold_stream(rx).await.unwrap();
        assert_eq!(turn.content.len(), 2);
        assert!(turn.wants_tools());
        let uses = turn.tool_uses();
        assert_eq!(uses[0].1, "create_file");
        assert_eq!(uses[0].2["filename"], "main.tf");
        assert_eq!(crate::protocol::text_of(&turn.content), "Writing main.tf");
    }

    #[tokio::test]
    async fn empty_stream_is_an_error() {
        let (tx, rx) = mpsc::channel::<Result<StreamEvent>>(1);
        drop(tx);
        assert!(fold_stream(rx).await.is_err());
    }
}
