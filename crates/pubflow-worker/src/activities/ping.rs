//! Liveness activity scheduled as the first step of several workflows.

use async_trait::async_trait;
use serde_json::Value;

use pubflow_durable::activity::{Activity, ActivityContext, Outcome};

pub struct Ping;

#[async_trait]
impl Activity for Ping {
    const NAME: &'static str = "Ping";
    const PRETTY_NAME: &'static str = "Ping worker";
    type Input = Value;

    async fn do_activity(
        &self,
        _ctx: &ActivityContext,
        _input: Self::Input,
    ) -> anyhow::Result<Outcome> {
        Ok(Outcome::success())
    }
}
