//! Single processing stage
//!
//! Every metadata operation, including the coordinator's internal install
//! requests, runs to completion on one task in arrival order. Handlers never
//! wait on OSDs, so the stage is never blocked by a slow reconfiguration.

use crate::collab::RequestContext;
use crate::context::MrcContext;
use crate::operations::{self, Request, Response};
use mrc_common::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

struct StageRequest {
    ctx: RequestContext,
    request: Request,
    reply: Option<oneshot::Sender<Result<Response>>>,
}

/// Sending side of the processing stage
#[derive(Clone)]
pub struct StageHandle {
    tx: mpsc::Sender<StageRequest>,
}

impl StageHandle {
    /// Run `request` on the stage and wait for its result.
    pub async fn call(&self, ctx: RequestContext, request: Request) -> Result<Response> {
        let (reply, rx) = oneshot::channel();
        self.send(StageRequest {
            ctx,
            request,
            reply: Some(reply),
        })
        .await?;
        rx.await
            .map_err(|_| Error::ServiceUnavailable("processing stage dropped the request".into()))?
    }

    /// Queue `request` without waiting for its result.
    pub async fn enqueue(&self, ctx: RequestContext, request: Request) -> Result<()> {
        self.send(StageRequest {
            ctx,
            request,
            reply: None,
        })
        .await
    }

    async fn send(&self, request: StageRequest) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| Error::ServiceUnavailable("processing stage is not running".into()))
    }
}

pub struct ProcessingStage {
    context: Arc<MrcContext>,
    requests: mpsc::Receiver<StageRequest>,
}

impl ProcessingStage {
    #[must_use]
    pub fn new(context: Arc<MrcContext>, queue_depth: usize) -> (Self, StageHandle) {
        let (tx, requests) = mpsc::channel(queue_depth.max(1));
        (Self { context, requests }, StageHandle { tx })
    }

    pub async fn run(mut self) {
        info!("Processing stage started");
        while let Some(request) = self.requests.recv().await {
            self.process(request);
        }
        info!("Processing stage stopped");
    }

    fn process(&self, request: StageRequest) {
        let StageRequest {
            ctx,
            request,
            reply,
        } = request;
        let kind = request.kind();
        debug!("Processing {} for {}", kind, ctx.user_id);

        let result = operations::dispatch(&self.context, &ctx, request);
        match reply {
            Some(reply) => {
                // The caller may have gone away; the operation is committed regardless.
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    warn!("{} failed: {}", kind, e);
                }
            }
        }
    }
}
