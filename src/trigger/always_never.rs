use async_trait::async_trait;

use super::{CompletionTrigger, CompletionType, TriggerContext};

/// Considers the page loaded the instant navigation begins.
#[derive(Debug, Default)]
pub struct AlwaysTrigger;

#[async_trait]
impl CompletionTrigger for AlwaysTrigger {
    async fn init(&self, _ctx: &TriggerContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn wait(&self) -> CompletionType {
        CompletionType::Always
    }

    async fn close(&self) {}
}

/// Never resolves on its own; exercises the renderer's timeout path.
#[derive(Debug, Default)]
pub struct NeverTrigger;

#[async_trait]
impl CompletionTrigger for NeverTrigger {
    async fn init(&self, _ctx: &TriggerContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn wait(&self) -> CompletionType {
        std::future::pending::<()>().await;
        unreachable!("NeverTrigger::wait never resolves")
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_resolves_immediately() {
        let trigger = AlwaysTrigger;
        let result = tokio::time::timeout(std::time::Duration::from_millis(50), trigger.wait()).await;
        assert_eq!(result.unwrap(), CompletionType::Always);
    }

    #[tokio::test]
    async fn never_times_out() {
        let trigger = NeverTrigger;
        let result = tokio::time::timeout(std::time::Duration::from_millis(50), trigger.wait()).await;
        assert!(result.is_err());
    }
}
