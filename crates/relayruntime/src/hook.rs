use crate::engine::Engine;
use relaycore::{
    HookFailure, HookMessage, HookReply, Logger, MessageSender, NodeHookInput, NodeHookOutput,
    ProbeRequest, TargetId,
};
use serde_json::json;
use std::sync::Arc;

/// Handles messages another process addressed to this engine.
#[derive(Clone)]
pub struct Hook {
    engine: Engine,
}

impl Hook {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Run the message and build the reply. Never fails: errors travel
    /// back as [`HookReply::Failed`].
    pub async fn handle(&self, message: HookMessage, sender: MessageSender) -> HookReply {
        match message {
            HookMessage::Node(input) => self.handle_node(input).await,
            HookMessage::Probe(ProbeRequest::GetCurrentTabId) => {
                HookReply::TabId(sender.tab.unwrap_or(TargetId::NONE))
            }
        }
    }

    async fn handle_node(&self, input: NodeHookInput) -> HookReply {
        let NodeHookInput { node_raw, context } = input;
        let name = node_raw.name.clone();
        let root = Logger::root();
        let context = context.shared();

        tracing::debug!("{} hook received {}", self.engine.role(), name);
        let result = self
            .engine
            .execute_node(node_raw, root.clone(), Arc::clone(&context))
            .await;
        let context = context.read().await.clone();

        match result {
            Ok(output) => HookReply::Node(NodeHookOutput {
                output,
                log_data: root.to_json(),
                context,
            }),
            Err(e) => {
                tracing::warn!("{} hook failed to run {}: {}", self.engine.role(), name, e);
                HookReply::Failed(HookFailure {
                    log_data: Some(root.to_json()),
                    context: Some(context),
                    ..HookFailure::from_error(&e)
                })
            }
        }
    }

    /// Wire-level entry point: JSON message in, JSON reply out.
    pub async fn handle_json(&self, message: &str, sender: MessageSender) -> String {
        let reply = match serde_json::from_str::<HookMessage>(message) {
            Ok(message) => self.handle(message, sender).await,
            Err(e) => HookReply::failed(format!("Invalid message format: {}", e)),
        };

        serde_json::to_string(&reply).unwrap_or_else(|e| {
            json!({
                "type": "failed",
                "data": { "message": format!("Failed to encode reply: {}", e) }
            })
            .to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::registry::NodeFactory;
    use async_trait::async_trait;
    use relaycore::{
        Affinity, Context, FailureKind, LogStatus, Node, NodeContext, NodeError, NodeRaw, ProcessRole,
    };
    use serde_json::Value;

    struct SetTitle;

    #[async_trait]
    impl Node for SetTitle {
        fn affinity(&self) -> Affinity {
            Affinity::Universal
        }

        async fn execute(&self, input: Value, ctx: NodeContext) -> Result<Value, NodeError> {
            let title = input.get("title").cloned().unwrap_or(Value::Null);
            ctx.context.write().await.set_extension("title", title.clone());
            Ok(title)
        }
    }

    struct SetTitleFactory;

    impl NodeFactory for SetTitleFactory {
        fn create(&self) -> Result<Box<dyn Node>, NodeError> {
            Ok(Box::new(SetTitle))
        }
    }

    fn hook() -> Hook {
        let engine = Engine::new(EngineConfig::for_role(ProcessRole::Content));
        engine.register_node("SetTitle", Arc::new(SetTitleFactory)).unwrap();
        engine.create_hook()
    }

    #[tokio::test]
    async fn test_node_reply_carries_log_and_context() {
        let message = HookMessage::node(
            NodeRaw::new("SetTitle", json!({ "title": "hello" })),
            Context::new(),
        );

        let reply = hook().handle(message, MessageSender::default()).await;

        let HookReply::Node(output) = reply else {
            panic!("expected a node reply, got {:?}", reply);
        };
        assert_eq!(output.output, json!("hello"));
        assert_eq!(output.context.extension("title"), Some(&json!("hello")));
        let record = &output.log_data.children[0];
        assert_eq!(record.status(), Some(LogStatus::Success));
    }

    #[tokio::test]
    async fn test_unknown_node_replies_failed() {
        let message = HookMessage::node(NodeRaw::new("Nope", json!({})), Context::new());

        let reply = hook().handle(message, MessageSender::default()).await;

        let HookReply::Failed(failure) = reply else {
            panic!("expected a failure, got {:?}", reply);
        };
        assert_eq!(failure.message, "Node \"Nope\" not found");
        assert_eq!(failure.kind, FailureKind::UnknownNode);
        assert!(failure.log_data.unwrap().children.is_empty());
    }

    #[tokio::test]
    async fn test_probe_answers_sender_tab() {
        let probe = HookMessage::Probe(ProbeRequest::GetCurrentTabId);

        let reply = hook()
            .handle(probe.clone(), MessageSender { tab: Some(TargetId::new(9)) })
            .await;
        assert_eq!(reply, HookReply::TabId(TargetId::new(9)));

        let reply = hook().handle(probe, MessageSender::default()).await;
        assert_eq!(reply, HookReply::TabId(TargetId::NONE));
    }

    #[tokio::test]
    async fn test_handle_json_rejects_garbage() {
        let reply = hook().handle_json("{not json", MessageSender::default()).await;

        let reply: HookReply = serde_json::from_str(&reply).unwrap();
        let HookReply::Failed(failure) = reply else {
            panic!("expected a failure");
        };
        assert!(failure.message.starts_with("Invalid message format"));
    }
}
