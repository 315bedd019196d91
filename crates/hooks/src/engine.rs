use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use waygate_context::{HookAction, PendingSideQuery, QueryContext};
use waygate_dns::HeaderSnapshot;
use waygate_sidequery::SideQueryTransport;

use crate::config::EngineConfig;
use crate::module::{HookPoint, OutQueryContext, PolicyModule, TagDecision, TagQuery};

/// How a hook point left the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not answered here; the pipeline proceeds unchanged.
    Continue,
    /// The context now carries the final rcode and record sequence.
    Answered,
    /// The query was abandoned while a side query was outstanding.
    Abandoned,
}

/// Dispatches hook callbacks for one resolution worker. The module table
/// is shared and read-only; all per-query mutable state lives on the
/// QueryContext, which only the owning worker touches.
pub struct HookEngine {
    module: Arc<PolicyModule>,
    transport: Arc<dyn SideQueryTransport>,
    config: EngineConfig,
}

impl HookEngine {
    pub fn new(
        module: Arc<PolicyModule>,
        transport: Arc<dyn SideQueryTransport>,
        config: EngineConfig,
    ) -> Self {
        Self {
            module,
            transport,
            config,
        }
    }

    pub fn module(&self) -> &PolicyModule {
        &self.module
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn needs_query_context(&self) -> bool {
        self.module.needs_query_context()
    }

    /// Fast-path gate, run before any per-query state is built. An
    /// unconfigured or failing filter allows the query through.
    pub fn ipfilter(&self, remote: SocketAddr, local: SocketAddr, header: &HeaderSnapshot) -> bool {
        let Some(filter) = self.module.ipfilter() else {
            return true;
        };
        match filter.allow(remote, local, header) {
            Ok(allow) => allow,
            Err(e) => {
                tracing::warn!(
                    worker = self.config.worker,
                    remote = %remote,
                    error = %e,
                    "ip filter failed, allowing query"
                );
                true
            }
        }
    }

    /// Classify the query before resolution. Failures fall back to the
    /// default tag rather than crashing the worker.
    pub fn classify(&self, query: &TagQuery) -> TagDecision {
        let Some(classifier) = self.module.gettag() else {
            return TagDecision::default();
        };
        match classifier.classify(query) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    worker = self.config.worker,
                    qname = %query.qname,
                    error = %e,
                    "tag classifier failed, using default tag"
                );
                TagDecision::default()
            }
        }
    }

    pub async fn prerpz(&self, ctx: &mut QueryContext) -> DispatchOutcome {
        self.dispatch(HookPoint::Prerpz, ctx).await
    }

    pub async fn preresolve(&self, ctx: &mut QueryContext) -> DispatchOutcome {
        self.dispatch(HookPoint::Preresolve, ctx).await
    }

    pub async fn nxdomain(&self, ctx: &mut QueryContext) -> DispatchOutcome {
        self.dispatch(HookPoint::Nxdomain, ctx).await
    }

    pub async fn nodata(&self, ctx: &mut QueryContext) -> DispatchOutcome {
        self.dispatch(HookPoint::Nodata, ctx).await
    }

    pub async fn postresolve(&self, ctx: &mut QueryContext) -> DispatchOutcome {
        self.dispatch(HookPoint::Postresolve, ctx).await
    }

    /// Bracket before an outgoing upstream query. Returning true means the
    /// hook supplied the answer and the real network query must be skipped.
    pub fn preoutquery(&self, out: &mut OutQueryContext) -> bool {
        let Some(hook) = self.module.preoutquery() else {
            return false;
        };
        match hook.invoke(out) {
            Ok(action) => action.handled(),
            Err(e) => {
                tracing::warn!(
                    worker = self.config.worker,
                    nameserver = %out.nameserver,
                    error = %e,
                    "preoutquery hook failed, performing real query"
                );
                false
            }
        }
    }

    /// Observe records received from upstream. May modify them in place;
    /// never short-circuits.
    pub fn postoutquery(&self, out: &mut OutQueryContext) {
        let Some(hook) = self.module.postoutquery() else {
            return;
        };
        if let Err(e) = hook.invoke(out) {
            tracing::warn!(
                worker = self.config.worker,
                nameserver = %out.nameserver,
                error = %e,
                "postoutquery hook failed, keeping records as received"
            );
        }
    }

    /// Invoke one context hook and drain any continuations it schedules.
    /// A suspended point resumes here, so no later hook point can fire
    /// between suspension and resumption.
    async fn dispatch(&self, point: HookPoint, ctx: &mut QueryContext) -> DispatchOutcome {
        let Some(hook) = self.module.hook(point) else {
            return DispatchOutcome::Continue;
        };

        let mut action = match hook.invoke(ctx) {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(
                    worker = self.config.worker,
                    hook = point.name(),
                    qname = %ctx.qname(),
                    error = %e,
                    "policy hook failed, treating point as unconfigured"
                );
                HookAction::Continue
            }
        };

        while let Some(PendingSideQuery {
            dest,
            payload,
            resume,
        }) = ctx.take_side_query()
        {
            if point == HookPoint::Postresolve {
                // final shaping point; resuming after it has nowhere to go
                tracing::warn!(
                    worker = self.config.worker,
                    qname = %ctx.qname(),
                    "side query submitted from postresolve is not supported, dropping"
                );
                break;
            }

            let cancel = ctx.cancellation().clone();
            let Some(answer) = self.exchange_side_query(&cancel, dest, payload).await else {
                return DispatchOutcome::Abandoned;
            };

            ctx.set_side_answer(answer);
            action = match resume(ctx) {
                Ok(action) => action,
                Err(e) => {
                    tracing::warn!(
                        worker = self.config.worker,
                        hook = point.name(),
                        qname = %ctx.qname(),
                        error = %e,
                        "continuation failed, treating point as unconfigured"
                    );
                    HookAction::Continue
                }
            };
        }

        match action {
            HookAction::Answered => DispatchOutcome::Answered,
            HookAction::Continue => DispatchOutcome::Continue,
        }
    }

    /// Run one side query without blocking other work on the runtime.
    /// `None` means the owning query was abandoned; otherwise the answer
    /// bytes, with failures collapsed to the empty sentinel.
    async fn exchange_side_query(
        &self,
        cancel: &CancellationToken,
        dest: SocketAddr,
        payload: Bytes,
    ) -> Option<Bytes> {
        if payload.len() > self.config.max_side_payload {
            tracing::warn!(
                worker = self.config.worker,
                dest = %dest,
                len = payload.len(),
                limit = self.config.max_side_payload,
                "side-query payload over limit, delivering empty answer"
            );
            return Some(Bytes::new());
        }

        let deadline = Instant::now() + self.config.side_query_timeout();

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(
                    worker = self.config.worker,
                    dest = %dest,
                    "query abandoned while side query outstanding"
                );
                None
            }
            result = self.transport.exchange(dest, payload, deadline) => {
                Some(match result {
                    Ok(answer) => answer,
                    Err(e) => {
                        tracing::warn!(
                            worker = self.config.worker,
                            dest = %dest,
                            error = %e,
                            "side query failed, delivering empty answer"
                        );
                        Bytes::new()
                    }
                })
            }
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod engine_tests;
