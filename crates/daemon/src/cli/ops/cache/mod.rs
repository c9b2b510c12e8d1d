use clap::Args;

pub mod status;
pub mod sweep;

use crate::cli::op::Op;

crate::command_enum! {
    (Sweep, sweep::Sweep),
    (Status, status::Status),
}

pub type CacheCommand = Command;

/// Inspect or clean the local cache
#[derive(Args, Debug, Clone)]
pub struct Cache {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[async_trait::async_trait]
impl Op for Cache {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}
