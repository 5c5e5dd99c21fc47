//! Ports to the opaque collaborators the Dispatcher drives: the model
//! invoker and the tool executor.
//!
//! `BotInvoker` returns a boxed stream so it can be used as a trait object
//! directly. `ToolExecutor` uses RPITIT; [`BoxToolExecutor`] erases it
//! through an object-safe mirror trait with a blanket impl.

use std::future::Future;
use std::pin::Pin;

use conclave_types::error::InvocationError;
use conclave_types::invocation::{BotOutput, InvocationRequest};
use futures_util::Stream;

/// Stream of outputs produced by one invocation.
pub type BotOutputStream = Pin<Box<dyn Stream<Item = Result<BotOutput, InvocationError>> + Send + 'static>>;

/// Invokes a bot's model. Timeouts are the invoker's responsibility and
/// surface as [`InvocationError::Timeout`].
pub trait BotInvoker: Send + Sync {
    fn name(&self) -> &str;

    fn invoke(&self, request: InvocationRequest) -> BotOutputStream;
}

/// Invoker used when no model gateway is configured: every invocation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableInvoker;

impl BotInvoker for UnavailableInvoker {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn invoke(&self, _request: InvocationRequest) -> BotOutputStream {
        Box::pin(futures_util::stream::once(async {
            Err(InvocationError::Unavailable)
        }))
    }
}

/// Runs external tools on behalf of bots.
pub trait ToolExecutor: Send + Sync {
    fn execute(
        &self,
        bot_id: &str,
        tool: &str,
        arguments: &serde_json::Value,
    ) -> impl Future<Output = Result<String, InvocationError>> + Send;
}

/// Executor with no tools at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTools;

impl ToolExecutor for NoTools {
    async fn execute(
        &self,
        _bot_id: &str,
        tool: &str,
        _arguments: &serde_json::Value,
    ) -> Result<String, InvocationError> {
        Err(InvocationError::UnknownTool(tool.to_string()))
    }
}

/// Object-safe version of [`ToolExecutor`] with boxed futures.
pub trait ToolExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        bot_id: &'a str,
        tool: &'a str,
        arguments: &'a serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<String, InvocationError>> + Send + 'a>>;
}

impl<T: ToolExecutor> ToolExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        bot_id: &'a str,
        tool: &'a str,
        arguments: &'a serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<String, InvocationError>> + Send + 'a>> {
        Box::pin(self.execute(bot_id, tool, arguments))
    }
}

/// Type-erased tool executor, chosen at startup.
pub struct BoxToolExecutor {
    inner: Box<dyn ToolExecutorDyn>,
}

impl BoxToolExecutor {
    pub fn new<T: ToolExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub async fn execute(
        &self,
        bot_id: &str,
        tool: &str,
        arguments: &serde_json::Value,
    ) -> Result<String, InvocationError> {
        self.inner.execute_boxed(bot_id, tool, arguments).await
    }
}

impl Default for BoxToolExecutor {
    fn default() -> Self {
        Self::new(NoTools)
    }
}

impl std::fmt::Debug for BoxToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxToolExecutor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn no_tools_rejects_every_tool() {
        let tools = BoxToolExecutor::default();
        let err = tools
            .execute("coder", "shell", &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, InvocationError::UnknownTool(t) if t == "shell"));
    }

    #[tokio::test]
    async fn unavailable_invoker_yields_one_error() {
        use crate::testing::sample_request;
        let mut stream = UnavailableInvoker.invoke(sample_request("lead"));
        assert!(matches!(
            stream.next().await,
            Some(Err(InvocationError::Unavailable))
        ));
        assert!(stream.next().await.is_none());
    }
}
