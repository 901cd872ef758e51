// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pipeline assembly.

use super::Collector;

/// Builds a linear chain of collectors, terminal stage first.
///
/// Each call to [`stage`](Self::stage) wraps everything added so far, so the
/// last stage added is the head of the chain and sees events first.
pub struct PipelineBuilder {
    chain: Box<dyn Collector>,
    stages: Vec<&'static str>,
}

impl PipelineBuilder {
    pub fn new<T: Collector + 'static>(terminal: T) -> Self {
        Self {
            chain: Box::new(terminal),
            stages: vec![short_type_name::<T>()],
        }
    }

    /// Wrap the chain built so far in a decorator.
    pub fn stage<C, F>(self, wrap: F) -> Self
    where
        C: Collector + 'static,
        F: FnOnce(Box<dyn Collector>) -> C,
    {
        let mut stages = self.stages;
        stages.push(short_type_name::<C>());
        Self {
            chain: Box::new(wrap(self.chain)),
            stages,
        }
    }

    /// Stage names from head to terminal.
    pub fn describe(&self) -> Vec<&'static str> {
        self.stages.iter().rev().copied().collect()
    }

    pub fn build(self) -> Box<dyn Collector> {
        self.chain
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{
        CollectorEvent, Disposition, ExclusionFilter, ExclusionRules, MemoryCollector,
        PacketCountCollector, PacketCountHandle, TrackerFilter,
    };

    #[tokio::test]
    async fn test_chain_preserves_order() {
        let sink = MemoryCollector::new();
        let counts = PacketCountHandle::new();
        let rules = ExclusionRules::new::<&str>(&[], &["^/skip"]).unwrap();

        let mut pipeline = PipelineBuilder::new(sink.clone())
            .stage(|inner| ExclusionFilter::new(inner, rules))
            .stage(|inner| TrackerFilter::new(inner, false))
            .stage(|inner| PacketCountCollector::with_handle(inner, counts.clone()))
            .build();

        let paths = ["/1", "/skip/2", "/3", "/4", "/skip/5", "/6"];
        for path in paths {
            pipeline
                .process(CollectorEvent::request("GET", "shop.test", path))
                .await
                .unwrap();
        }
        let tracker = pipeline
            .process(CollectorEvent::request("GET", "doubleclick.net", "/7"))
            .await
            .unwrap();
        assert_eq!(tracker, Disposition::Dropped);
        pipeline.close().await.unwrap();

        let delivered: Vec<String> = sink.events().into_iter().map(|e| e.path).collect();
        assert_eq!(delivered, vec!["/1", "/3", "/4", "/6"]);

        let total = counts.snapshot().total();
        assert_eq!(total.input, 7);
        assert_eq!(total.forwarded, 4);
        assert_eq!(total.filtered, 3);
    }

    #[test]
    fn test_describe_lists_head_first() {
        let builder = PipelineBuilder::new(MemoryCollector::new())
            .stage(|inner| TrackerFilter::new(inner, false))
            .stage(PacketCountCollector::new);
        assert_eq!(
            builder.describe(),
            vec!["PacketCountCollector", "TrackerFilter", "MemoryCollector"]
        );
    }
}
