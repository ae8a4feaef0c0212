//! Build orchestration
//!
//! [`Engine`] ties the job pool, the change tracker and the watcher
//! together. Callers supply a build function that receives a [`Context`]
//! and queues jobs on it:
//!
//! ```ignore
//! let mut engine = Engine::new(config)?;
//! engine
//!   .build(|ctx| {
//!     for source in fs::read_dir(ctx, ctx.source_dir())? {
//!       let ctx_ = ctx.clone();
//!       let target = ctx.target_dir().to_path_buf();
//!       ctx.add_job(source.display().to_string(), move || fs::copy_file_to_dir(&ctx_, &source, &target));
//!     }
//!     Ok(())
//!   })
//!   .await?;
//! ```

mod build;
mod cache;
mod context;
pub mod fs;
mod stats;

pub use build::{BuildError, Engine, RoundSummary};
pub use cache::FsCache;
pub use context::Context;
pub use stats::Stats;
