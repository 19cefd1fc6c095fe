//! Message dispatch: pick a reply for a verified message and send it once.
//!
//! Routes are evaluated in order and the first match wins. The default table answers the
//! `#摘要` and `#翻譯` commands with fixed placeholders and sends everything else to the model.

use crate::channels::{InboundMessage, ReplySender};
use crate::llm::{GeminiError, TextGenerator};
use crate::session::Conversation;
use std::sync::Arc;
use std::time::Duration;

pub const SUMMARY_COMMAND: &str = "#摘要";
pub const TRANSLATE_COMMAND: &str = "#翻譯";
pub const SUMMARY_PLACEHOLDER: &str = "（暫未串接）這裡會幫你做文章摘要";
pub const TRANSLATE_PLACEHOLDER: &str = "（暫未串接）這裡會幫你翻譯文字";

/// Built-in persona placed before the user's text.
pub const DEFAULT_PERSONA: &str = "你是阿統，一個有個性的聊天機器人，雖然不喜歡做事，但通常很心軟，會幫我做摘要、解程式，也會聊天。
若用戶沒有特別指令，就用你的個性回應。
以下是用戶的訊息：";

const FALLBACK_NOTICE: &str = "目前無法使用 Gemini，已切換簡易回覆：";

/// Degraded reply used when the model cannot answer.
pub fn fallback_reply(user_text: &str) -> String {
    format!("{}{}", FALLBACK_NOTICE, user_text)
}

/// Persona preamble followed by the user's raw text.
pub fn compose_prompt(persona: &str, user_text: &str) -> String {
    format!("{}\n{}\n", persona.trim_end(), user_text)
}

/// When a route applies.
#[derive(Debug, Clone)]
pub enum Matcher {
    Prefix(String),
    Any,
}

impl Matcher {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Matcher::Prefix(p) => text.starts_with(p.as_str()),
            Matcher::Any => true,
        }
    }
}

/// What a matched route replies with.
#[derive(Debug, Clone)]
pub enum Handler {
    Fixed(String),
    Generate,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    pub matcher: Matcher,
    pub handler: Handler,
}

impl Route {
    pub fn new(name: impl Into<String>, matcher: Matcher, handler: Handler) -> Self {
        Self {
            name: name.into(),
            matcher,
            handler,
        }
    }
}

/// Summary and translate placeholders, then the model for everything else.
pub fn default_routes() -> Vec<Route> {
    vec![
        Route::new(
            "summary",
            Matcher::Prefix(SUMMARY_COMMAND.to_string()),
            Handler::Fixed(SUMMARY_PLACEHOLDER.to_string()),
        ),
        Route::new(
            "translate",
            Matcher::Prefix(TRANSLATE_COMMAND.to_string()),
            Handler::Fixed(TRANSLATE_PLACEHOLDER.to_string()),
        ),
        Route::new("chat", Matcher::Any, Handler::Generate),
    ]
}

/// Outcome of route selection.
#[derive(Debug, PartialEq, Eq)]
pub enum Decision<'a> {
    Fixed { route: &'a str, text: &'a str },
    Generate,
}

/// Dispatcher options taken from config.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub persona: String,
    pub timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Computes and delivers replies. Shared across event tasks behind an `Arc`.
pub struct Dispatcher {
    routes: Vec<Route>,
    options: DispatchOptions,
    generator: Arc<dyn TextGenerator>,
    conversation: Conversation,
    sender: Arc<dyn ReplySender>,
}

impl Dispatcher {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        sender: Arc<dyn ReplySender>,
        conversation: Conversation,
        options: DispatchOptions,
    ) -> Self {
        Self {
            routes: default_routes(),
            options,
            generator,
            conversation,
            sender,
        }
    }

    /// Replace the route table.
    pub fn with_routes(mut self, routes: Vec<Route>) -> Self {
        self.routes = routes;
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// First matching route; text no route claims goes to the model.
    pub fn decide<'a>(&'a self, text: &str) -> Decision<'a> {
        match self.routes.iter().find(|r| r.matcher.matches(text)) {
            Some(Route {
                name,
                handler: Handler::Fixed(reply),
                ..
            }) => Decision::Fixed {
                route: name,
                text: reply,
            },
            _ => Decision::Generate,
        }
    }

    /// Model reply for `text`, bounded by the configured timeout and trimmed.
    pub async fn generate(&self, text: &str) -> Result<String, GeminiError> {
        let call = self
            .conversation
            .send(self.generator.as_ref(), &self.options.persona, text);
        let reply = tokio::time::timeout(self.options.timeout, call)
            .await
            .map_err(|_| GeminiError::Timeout(self.options.timeout))??;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(GeminiError::Empty);
        }
        Ok(reply.to_string())
    }

    /// Reply text for `text`. Never fails: model errors become the fallback reply.
    pub async fn compute_reply(&self, text: &str) -> String {
        match self.decide(text) {
            Decision::Fixed { route, text: reply } => {
                log::debug!("dispatch: matched {} route", route);
                reply.to_string()
            }
            Decision::Generate => match self.generate(text).await {
                Ok(reply) => reply,
                Err(e) => {
                    log::warn!("dispatch: generation failed, sending fallback: {}", e);
                    fallback_reply(text)
                }
            },
        }
    }

    /// Compute the reply and send it with the message's reply token. One attempt, no retry.
    pub async fn handle(&self, msg: InboundMessage) {
        let InboundMessage {
            reply_token,
            text,
            user_id,
            webhook_event_id,
            redelivery,
        } = msg;
        log::info!(
            "dispatch: message event {} from {} (redelivery: {})",
            webhook_event_id.as_deref().unwrap_or("-"),
            user_id.as_deref().unwrap_or("unknown"),
            redelivery
        );
        let reply = self.compute_reply(&text).await;
        let token_hint = reply_token.redacted();
        if let Err(e) = self.sender.reply(reply_token, &reply).await {
            log::warn!("dispatch: reply with token {} failed: {}", token_hint, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ReplyError, ReplyToken};
    use crate::llm::Content;
    use crate::session::SessionMode;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    enum Behaviour {
        Reply(&'static str),
        Fail,
        Hang,
        Delayed(Duration, &'static str),
    }

    struct StubGenerator {
        behaviour: Behaviour,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl StubGenerator {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for StubGenerator {
        async fn generate(&self, contents: &[Content]) -> Result<String, GeminiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(last) = contents.last() {
                self.prompts.lock().unwrap().push(last.text());
            }
            match self.behaviour {
                Behaviour::Reply(text) => Ok(text.to_string()),
                Behaviour::Fail => Err(GeminiError::Api {
                    status: 429,
                    message: "quota exceeded".to_string(),
                }),
                Behaviour::Delayed(delay, text) => {
                    tokio::time::sleep(delay).await;
                    Ok(text.to_string())
                }
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok("too late".to_string())
                }
            }
        }
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl ReplySender for RecordingSender {
        async fn reply(&self, token: ReplyToken, text: &str) -> Result<(), ReplyError> {
            self.sent
                .lock()
                .unwrap()
                .push((token.as_str().to_string(), text.to_string()));
            if self.fail {
                return Err(ReplyError::Api {
                    status: 400,
                    body: "Invalid reply token".to_string(),
                });
            }
            Ok(())
        }
    }

    fn dispatcher(
        generator: Arc<StubGenerator>,
        sender: Arc<RecordingSender>,
        timeout: Duration,
    ) -> Dispatcher {
        Dispatcher::new(
            generator,
            sender,
            Conversation::new(SessionMode::SingleShot, 1),
            DispatchOptions {
                timeout,
                ..Default::default()
            },
        )
    }

    fn shared_chat_dispatcher(
        generator: Arc<StubGenerator>,
        sender: Arc<RecordingSender>,
        timeout: Duration,
    ) -> Dispatcher {
        Dispatcher::new(
            generator,
            sender,
            Conversation::new(SessionMode::SharedChat, 10),
            DispatchOptions {
                timeout,
                ..Default::default()
            },
        )
    }

    fn message(token: &str, text: &str) -> InboundMessage {
        InboundMessage {
            reply_token: ReplyToken::new(token),
            text: text.to_string(),
            user_id: Some("U1".to_string()),
            webhook_event_id: None,
            redelivery: false,
        }
    }

    #[tokio::test]
    async fn summary_command_uses_placeholder_without_model() {
        let generator = StubGenerator::new(Behaviour::Fail);
        let d = dispatcher(generator.clone(), Arc::default(), Duration::from_secs(1));
        assert_eq!(d.compute_reply("#摘要 hello").await, SUMMARY_PLACEHOLDER);
        assert_eq!(d.compute_reply("#摘要").await, SUMMARY_PLACEHOLDER);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn translate_command_uses_placeholder() {
        let generator = StubGenerator::new(Behaviour::Reply("unused"));
        let d = dispatcher(generator.clone(), Arc::default(), Duration::from_secs(1));
        assert_eq!(d.compute_reply("#翻譯 good morning").await, TRANSLATE_PLACEHOLDER);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn command_must_be_a_prefix() {
        let generator = StubGenerator::new(Behaviour::Reply("model"));
        let d = dispatcher(generator, Arc::default(), Duration::from_secs(1));
        assert_eq!(d.decide(" #摘要"), Decision::Generate);
        assert_eq!(d.decide("please #翻譯"), Decision::Generate);
        assert_eq!(
            d.decide("#翻譯"),
            Decision::Fixed {
                route: "translate",
                text: TRANSLATE_PLACEHOLDER
            }
        );
    }

    #[tokio::test]
    async fn model_reply_is_trimmed_and_prompt_has_persona() {
        let generator = StubGenerator::new(Behaviour::Reply("\n  hello there \n"));
        let d = dispatcher(generator.clone(), Arc::default(), Duration::from_secs(1));
        assert_eq!(d.compute_reply("hi").await, "hello there");
        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("你是阿統"));
        assert!(prompts[0].ends_with("以下是用戶的訊息：\nhi\n"));
    }

    #[tokio::test]
    async fn model_failure_falls_back_to_echo() {
        let generator = StubGenerator::new(Behaviour::Fail);
        let d = dispatcher(generator, Arc::default(), Duration::from_secs(1));
        let reply = d.compute_reply("hi").await;
        assert_eq!(reply, fallback_reply("hi"));
        assert!(reply.contains("hi"));
        assert!(reply.starts_with(FALLBACK_NOTICE));
    }

    #[tokio::test]
    async fn blank_model_reply_falls_back() {
        let generator = StubGenerator::new(Behaviour::Reply("   "));
        let d = dispatcher(generator, Arc::default(), Duration::from_secs(1));
        assert_eq!(d.compute_reply("hi").await, fallback_reply("hi"));
    }

    #[tokio::test]
    async fn slow_model_times_out_into_fallback() {
        let generator = StubGenerator::new(Behaviour::Hang);
        let d = dispatcher(generator, Arc::default(), Duration::from_millis(20));
        assert!(matches!(d.generate("hi").await, Err(GeminiError::Timeout(_))));
        assert_eq!(d.compute_reply("hi").await, fallback_reply("hi"));
    }

    #[tokio::test]
    async fn handle_sends_exactly_once_even_when_send_fails() {
        let generator = StubGenerator::new(Behaviour::Reply("hello there"));
        let sender = Arc::new(RecordingSender {
            fail: true,
            ..Default::default()
        });
        let d = dispatcher(generator, sender.clone(), Duration::from_secs(1));
        d.handle(message("token-1", "hi")).await;
        let sent = sender.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![("token-1".to_string(), "hello there".to_string())]
        );
    }

    #[tokio::test]
    async fn custom_routes_are_evaluated_in_order() {
        let generator = StubGenerator::new(Behaviour::Reply("model"));
        let d = dispatcher(generator, Arc::default(), Duration::from_secs(1)).with_routes(vec![
            Route::new("help", Matcher::Prefix("/help".into()), Handler::Fixed("usage".into())),
            Route::new("catch-all", Matcher::Any, Handler::Fixed("later".into())),
            Route::new("never", Matcher::Prefix("/help".into()), Handler::Generate),
        ]);
        assert_eq!(d.compute_reply("/help me").await, "usage");
        assert_eq!(d.compute_reply("anything").await, "later");
    }

    #[tokio::test]
    async fn shared_chat_messages_do_not_spend_each_others_timeout() {
        let generator = StubGenerator::new(Behaviour::Delayed(Duration::from_millis(600), "answer"));
        let sender = Arc::new(RecordingSender::default());
        let d = shared_chat_dispatcher(generator.clone(), sender.clone(), Duration::from_secs(1));

        tokio::join!(
            d.handle(message("token-a", "hello")),
            d.handle(message("token-b", "hi")),
        );

        let mut sent = sender.sent.lock().unwrap().clone();
        sent.sort();
        assert_eq!(
            sent,
            vec![
                ("token-a".to_string(), "answer".to_string()),
                ("token-b".to_string(), "answer".to_string()),
            ]
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        match d.conversation() {
            Conversation::Shared(chat) => assert_eq!(chat.len().await, 4),
            Conversation::SingleShot => panic!("expected shared chat"),
        }
    }
}
