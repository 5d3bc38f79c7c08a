//! One staff station: a stream engine per followed stream plus log watchers.

use std::sync::Arc;

use anyhow::Context;
use sync_engine::transport::{ApiClient, WebSocketTransport};
use sync_engine::{EndpointParams, Notifier, StreamEngine, WatermarkStore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use types::entity::StreamEntity;
use types::ids::RestaurantId;
use types::order::OrderDetailRecord;
use types::request::RequestRecord;
use types::stream::StreamKind;

use crate::cli::Args;

pub struct Station {
    requests: Option<StreamEngine<RequestRecord>>,
    orders: Option<StreamEngine<OrderDetailRecord>>,
    watchers: JoinSet<()>,
}

impl Station {
    pub fn build(args: &Args, notifier: Arc<dyn Notifier>) -> anyhow::Result<Self> {
        let api = Arc::new(
            ApiClient::new(&args.base_url, args.token.clone()).context("invalid --base-url")?,
        );
        let transport = Arc::new(WebSocketTransport::new());

        let requests = args
            .follows(StreamKind::Request)
            .then(|| build_engine::<RequestRecord>(args, &api, &transport, &notifier));
        let orders = args
            .follows(StreamKind::Order)
            .then(|| build_engine::<OrderDetailRecord>(args, &api, &transport, &notifier));

        if requests.is_none() && orders.is_none() {
            anyhow::bail!("no stream selected");
        }

        Ok(Self {
            requests,
            orders,
            watchers: JoinSet::new(),
        })
    }

    pub async fn start(&mut self) {
        if let Some(engine) = self.requests.as_mut() {
            engine.start().await;
            watch_engine(engine, &mut self.watchers);
        }
        if let Some(engine) = self.orders.as_mut() {
            engine.start().await;
            watch_engine(engine, &mut self.watchers);
        }
    }

    /// Log a warning for every stream that currently has no live transport.
    pub fn report_health(&self) {
        if let Some(engine) = &self.requests {
            report(engine);
        }
        if let Some(engine) = &self.orders {
            report(engine);
        }
    }

    pub async fn stop(&mut self) {
        self.watchers.abort_all();
        if let Some(engine) = self.requests.as_mut() {
            engine.stop().await;
        }
        if let Some(engine) = self.orders.as_mut() {
            engine.stop().await;
        }
    }
}

fn build_engine<E: StreamEntity>(
    args: &Args,
    api: &Arc<ApiClient>,
    transport: &Arc<WebSocketTransport>,
    notifier: &Arc<dyn Notifier>,
) -> StreamEngine<E> {
    let mut builder = StreamEngine::<E>::builder(Arc::clone(notifier))
        .store(WatermarkStore::in_dir(&args.cache_dir))
        .polling(api.clone())
        .config(args.engine_config());

    if let Some(hub) = &args.hub_url {
        let mut params = EndpointParams::new(hub.clone(), RestaurantId::new(args.restaurant_id));
        if let Some(token) = &args.token {
            params = params.with_token(token.clone());
        }
        builder = builder.push(transport.clone(), params);
    }

    builder.build()
}

fn watch_engine<E: StreamEntity>(engine: &StreamEngine<E>, watchers: &mut JoinSet<()>) {
    let mut views = engine.subscribe_view();
    watchers.spawn(async move {
        while views.changed().await.is_ok() {
            let size = views.borrow_and_update().len();
            info!(stream = %E::KIND, entries = size, "Collection updated");
        }
    });

    if let Some(mut connection) = engine.watch_connection() {
        watchers.spawn(async move {
            while connection.changed().await.is_ok() {
                let status = *connection.borrow_and_update();
                info!(
                    stream = %E::KIND,
                    state = %status.state,
                    failures = status.consecutive_failures,
                    "Push channel state changed"
                );
            }
        });
    }

    let mut watermark = engine.watch_watermark();
    watchers.spawn(async move {
        while watermark.changed().await.is_ok() {
            if let Some(at) = *watermark.borrow_and_update() {
                debug!(stream = %E::KIND, watermark = %at, "Watermark advanced");
            }
        }
    });
}

fn report<E: StreamEntity>(engine: &StreamEngine<E>) {
    let status = engine.status();
    if status.is_blind() {
        warn!(stream = %E::KIND, polling = %status.polling, "No transport is delivering updates");
    } else if let Some(degraded) = status.degraded_for(Instant::now()) {
        info!(
            stream = %E::KIND,
            degraded_secs = degraded.as_secs(),
            polling = %status.polling,
            "Push channel degraded; relying on polling"
        );
    }
}
