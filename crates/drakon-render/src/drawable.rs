// SPDX-License-Identifier: CEPL-1.0
//! Things that issue draw commands, and the lazily built pipeline they own.

use crate::{
    backend::PassEncoder,
    pipeline::{PipelineCache, PipelineConfig, PipelineHandle},
    RenderSize,
};
use anyhow::Result;
use std::ops::Range;
use tracing::{debug, warn};

/// Called once per frame inside the open render pass. Must be safe to call
/// every frame and do its own one-time setup.
pub trait Drawable {
    fn draw(&mut self, ctx: &mut DrawContext<'_>);
}

/// What a [`Drawable`] sees while the pass is open.
pub struct DrawContext<'a> {
    pass: &'a mut dyn PassEncoder,
    pipelines: &'a mut PipelineCache,
}

impl<'a> DrawContext<'a> {
    pub fn new(pass: &'a mut dyn PassEncoder, pipelines: &'a mut PipelineCache) -> Self {
        DrawContext { pass, pipelines }
    }

    pub fn extent(&self) -> RenderSize {
        self.pass.extent()
    }

    /// Cached pipeline for `config`, building it on the device if needed.
    pub fn pipeline(&mut self, config: &PipelineConfig) -> Result<PipelineHandle> {
        let DrawContext { pass, pipelines } = self;
        pipelines.get_or_build(config, |cfg| pass.create_pipeline(cfg))
    }

    pub fn pipeline_epoch(&self) -> u64 {
        self.pipelines.epoch()
    }

    pub fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pass.bind_pipeline(pipeline);
    }

    pub fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.pass.draw(vertices, instances);
    }
}

/// A pipeline built on first use.
///
/// After a successful build the handle is reused until the renderer's cache
/// is cleared. After a failed build the next `ensure` runs the whole build
/// again.
#[derive(Debug)]
pub struct LazyPipeline {
    config: PipelineConfig,
    built: Option<(u64, PipelineHandle)>,
    attempts: u32,
}

impl LazyPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        LazyPipeline {
            config,
            built: None,
            attempts: 0,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle if built against the current cache epoch.
    pub fn ensure(&mut self, ctx: &mut DrawContext<'_>) -> Option<PipelineHandle> {
        let epoch = ctx.pipeline_epoch();
        if let Some((built_epoch, handle)) = self.built {
            if built_epoch == epoch {
                return Some(handle);
            }
            debug!("pipeline from epoch {built_epoch} is stale, rebuilding");
            self.built = None;
        }

        self.attempts += 1;
        match ctx.pipeline(&self.config) {
            Ok(handle) => {
                self.built = Some((epoch, handle));
                Some(handle)
            }
            Err(e) => {
                warn!("pipeline build failed (attempt {}): {e:#}", self.attempts);
                None
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.built.is_some()
    }

    pub fn handle(&self) -> Option<PipelineHandle> {
        self.built.map(|(_, h)| h)
    }

    /// Build attempts made through this pipeline, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        builds: u32,
        fail: bool,
        bound: Vec<PipelineHandle>,
        draws: Vec<(Range<u32>, Range<u32>)>,
    }

    impl PassEncoder for Recorder {
        fn extent(&self) -> RenderSize {
            RenderSize {
                width: 64,
                height: 32,
            }
        }

        fn create_pipeline(&mut self, _: &PipelineConfig) -> Result<PipelineHandle> {
            self.builds += 1;
            if self.fail {
                anyhow::bail!("shader compile error");
            }
            Ok(PipelineHandle::new(self.builds - 1))
        }

        fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
            self.bound.push(pipeline);
        }

        fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
            self.draws.push((vertices, instances));
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::hlsl("float4 VSMain() : SV_Position { return 0; }")
    }

    #[test]
    fn builds_once_after_success() {
        let mut pass = Recorder::default();
        let mut cache = PipelineCache::new();
        let mut lazy = LazyPipeline::new(config());

        for _ in 0..5 {
            let mut ctx = DrawContext::new(&mut pass, &mut cache);
            let handle = lazy.ensure(&mut ctx).unwrap();
            ctx.bind_pipeline(handle);
            ctx.draw(0..3, 0..1);
        }

        assert_eq!(pass.builds, 1);
        assert_eq!(lazy.attempts(), 1);
        assert_eq!(pass.draws.len(), 5);
        assert!(lazy.is_initialized());
    }

    #[test]
    fn failed_build_retries_each_call() {
        let mut pass = Recorder {
            fail: true,
            ..Default::default()
        };
        let mut cache = PipelineCache::new();
        let mut lazy = LazyPipeline::new(config());

        for _ in 0..3 {
            let mut ctx = DrawContext::new(&mut pass, &mut cache);
            assert!(lazy.ensure(&mut ctx).is_none());
        }
        assert_eq!(pass.builds, 3);
        assert!(!lazy.is_initialized());

        pass.fail = false;
        let mut ctx = DrawContext::new(&mut pass, &mut cache);
        assert!(lazy.ensure(&mut ctx).is_some());
        assert_eq!(lazy.attempts(), 4);
    }

    #[test]
    fn instances_with_same_config_share_a_pipeline() {
        let mut pass = Recorder::default();
        let mut cache = PipelineCache::new();
        let mut a = LazyPipeline::new(config());
        let mut b = LazyPipeline::new(config());

        let mut ctx = DrawContext::new(&mut pass, &mut cache);
        let ha = a.ensure(&mut ctx);
        let hb = b.ensure(&mut ctx);
        assert_eq!(ha, hb);
        assert_eq!(pass.builds, 1);
    }

    #[test]
    fn cleared_cache_invalidates_handle() {
        let mut pass = Recorder::default();
        let mut cache = PipelineCache::new();
        let mut lazy = LazyPipeline::new(config());

        lazy.ensure(&mut DrawContext::new(&mut pass, &mut cache));
        cache.clear();
        lazy.ensure(&mut DrawContext::new(&mut pass, &mut cache));

        assert_eq!(pass.builds, 2);
        assert_eq!(lazy.attempts(), 2);
    }

    #[test]
    fn context_reports_pass_extent() {
        let mut pass = Recorder::default();
        let mut cache = PipelineCache::new();
        let ctx = DrawContext::new(&mut pass, &mut cache);
        assert_eq!(ctx.extent().width, 64);
    }
}
