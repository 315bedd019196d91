use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use waygate_context::{AppliedPolicy, InboundQuery, QueryContext};
use waygate_dns::{DnsRecord, RecordPlace, ResponseCode};

use crate::engine::{DispatchOutcome, HookEngine};
use crate::module::TagQuery;

/// Answer produced by the resolution collaborator.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAnswer {
    pub rcode: ResponseCode,
    pub records: Vec<DnsRecord>,
}

/// The resolution algorithm proper, which this subsystem does not define.
/// Implementations must bracket every upstream query they issue with
/// [`HookEngine::preoutquery`] / [`HookEngine::postoutquery`]; when
/// preoutquery answers, the real network query must not be sent.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(
        &self,
        query: &InboundQuery,
        tag: u32,
        hooks: &HookEngine,
    ) -> anyhow::Result<ResolvedAnswer>;
}

/// Final result of pushing one query through the pipeline.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// The ip filter rejected the source before any per-query state existed.
    Dropped,
    /// The client went away while the query was suspended on a side query.
    Abandoned,
    Answered(QueryAnswer),
}

#[derive(Debug, Default)]
pub struct QueryAnswer {
    pub rcode: ResponseCode,
    pub records: Vec<DnsRecord>,
    pub tag: u32,
    pub policy_tags: Vec<String>,
    pub applied_policy: Option<AppliedPolicy>,
    pub variable: bool,
}

/// Drives one client query through the hook points around the resolver:
/// ipfilter -> gettag -> prerpz -> preresolve -> (resolution) ->
/// nxdomain | nodata -> postresolve.
pub struct QueryPipeline {
    engine: HookEngine,
}

impl QueryPipeline {
    pub fn new(engine: HookEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &HookEngine {
        &self.engine
    }

    pub async fn run(
        &self,
        query: InboundQuery,
        resolver: &dyn Resolver,
        cancel: CancellationToken,
    ) -> PipelineOutcome {
        if !self.engine.ipfilter(query.remote, query.local, &query.header) {
            tracing::debug!(remote = %query.remote, "query dropped by ip filter");
            return PipelineOutcome::Dropped;
        }

        let decision = self.engine.classify(&TagQuery {
            remote: query.remote,
            local: query.local,
            subnet: query.client_subnet(),
            qname: query.qname.clone(),
            qtype: query.qtype,
        });

        if !self.engine.needs_query_context() {
            // nothing will look at a context, so none is built; the
            // resolver output passes through untouched
            let answer = self.resolve_or_servfail(&query, decision.tag, resolver).await;
            return PipelineOutcome::Answered(QueryAnswer {
                rcode: answer.rcode,
                records: answer.records,
                tag: decision.tag,
                ..Default::default()
            });
        }

        let mut ctx = QueryContext::new(query, decision.tag, decision.per_type_data, cancel);
        let mut handled = false;

        match self.engine.prerpz(&mut ctx).await {
            DispatchOutcome::Abandoned => return PipelineOutcome::Abandoned,
            DispatchOutcome::Answered => handled = true,
            DispatchOutcome::Continue => {}
        }

        if !handled {
            match self.engine.preresolve(&mut ctx).await {
                DispatchOutcome::Abandoned => return PipelineOutcome::Abandoned,
                DispatchOutcome::Answered => handled = true,
                DispatchOutcome::Continue => {}
            }
        }

        if !handled {
            let answer = self
                .resolve_or_servfail(ctx.query(), ctx.tag(), resolver)
                .await;
            ctx.set_rcode(answer.rcode);
            ctx.set_records(answer.records);

            let shaped = match ctx.rcode() {
                ResponseCode::NxDomain => Some(self.engine.nxdomain(&mut ctx).await),
                ResponseCode::NoError if !has_answer_records(&ctx) => {
                    Some(self.engine.nodata(&mut ctx).await)
                }
                _ => None,
            };
            if shaped == Some(DispatchOutcome::Abandoned) {
                return PipelineOutcome::Abandoned;
            }
        }

        // postresolve is the last point before answer emission, whether or
        // not an earlier point already answered
        if self.engine.postresolve(&mut ctx).await == DispatchOutcome::Abandoned {
            return PipelineOutcome::Abandoned;
        }

        PipelineOutcome::Answered(QueryAnswer {
            rcode: ctx.rcode(),
            tag: ctx.tag(),
            variable: ctx.variable(),
            records: ctx.take_records(),
            policy_tags: ctx.take_policy_tags(),
            applied_policy: ctx.take_applied_policy(),
        })
    }

    async fn resolve_or_servfail(
        &self,
        query: &InboundQuery,
        tag: u32,
        resolver: &dyn Resolver,
    ) -> ResolvedAnswer {
        match resolver.resolve(query, tag, &self.engine).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(qname = %query.qname, error = %e, "resolution failed");
                ResolvedAnswer {
                    rcode: ResponseCode::ServerFailure,
                    records: Vec::new(),
                }
            }
        }
    }
}

fn has_answer_records(ctx: &QueryContext) -> bool {
    ctx.records().iter().any(|r| r.place == RecordPlace::Answer)
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod pipeline_tests;
