//! Bridge server: pools, broker, workers and the HTTP surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use esb_bridge::basic_data::{self, InterfaceService, ProfileStore, TransportWorker, UpdateWorker};
use esb_bridge::broker::{JobQueue, PgBroker, QueueRunner, RunnerHandle};
use esb_bridge::config::BridgeConfig;
use esb_bridge::database::ConnectionManager;
use esb_bridge::esb::{EsbAuth, EsbClient};
use esb_bridge::ora::Repository;
use esb_bridge::plsql::{
    CallbackRuntime, CallbackWorker, GatewayService, Invoker, RegistWorker, SqlGatewayStore,
    REGIST_QUEUE,
};
use esb_bridge::web::{self, AppState};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    esb_bridge::logging::init();

    let config = BridgeConfig::load().context("loading configuration")?;
    info!(env = %config.profile_env, "bridge starting");

    let manager = Arc::new(
        ConnectionManager::init(config.oracle_configs()).context("initializing oracle pools")?,
    );
    let broker: Arc<dyn JobQueue> = Arc::new(
        PgBroker::connect(&config.broker.database_url)
            .await
            .context("connecting job broker")?,
    );

    let profiles = Arc::new(
        ProfileStore::new(Arc::clone(&manager), config.profile_env.clone())
            .context("building profile store")?,
    );

    let mut runners: Vec<RunnerHandle> = Vec::new();
    let mut interfaces: HashMap<&'static str, Arc<InterfaceService>> = HashMap::new();

    // receipts feed: update worker + transport worker + admin service
    {
        let spec = basic_data::receipts::SPEC;
        let store = Arc::new(basic_data::receipts::store(
            Arc::clone(&manager),
            Arc::clone(&profiles),
        ));
        let update = Arc::new(UpdateWorker {
            spec,
            store: store.clone(),
            queue: Arc::clone(&broker),
        });
        let transport = Arc::new(TransportWorker {
            spec,
            store: store.clone(),
            queue: Arc::clone(&broker),
            esb: EsbClient::new(),
        });
        runners.push(QueueRunner::spawn(
            Arc::clone(&broker),
            spec.update_queue,
            update,
            POLL_INTERVAL,
        ));
        runners.push(QueueRunner::spawn(
            Arc::clone(&broker),
            spec.transport_queue,
            transport,
            POLL_INTERVAL,
        ));
        interfaces.insert(
            spec.name,
            Arc::new(InterfaceService::new(spec, store, Arc::clone(&broker))),
        );
    }

    // branch feed: one-shot cursor worker
    {
        let source = Arc::new(basic_data::branches::SqlCursorSource::new(Arc::clone(
            &manager,
        )));
        let worker = Arc::new(basic_data::branches::BranchFeedWorker::new(
            source,
            Arc::clone(&profiles),
        ));
        runners.push(QueueRunner::spawn(
            Arc::clone(&broker),
            basic_data::branches::TRANSPORT_QUEUE,
            worker,
            POLL_INTERVAL,
        ));
    }

    // gateway: registration worker + on-demand callback queues
    let gateway_store = Arc::new(SqlGatewayStore::new(Arc::clone(&manager)));
    let invoker = Invoker {
        store: gateway_store.clone(),
    };
    let callback_auth = EsbAuth {
        username: config.esb.username.clone(),
        password: config.esb.password.clone(),
    };
    let callback_worker = Arc::new(CallbackWorker {
        store: gateway_store.clone(),
        invoker: invoker.clone(),
        esb: EsbClient::new(),
        callback_auth,
    });
    let callbacks = Arc::new(CallbackRuntime::new(
        Arc::clone(&broker),
        callback_worker,
    ));
    let regist_worker = Arc::new(RegistWorker {
        store: gateway_store.clone(),
        queue: Arc::clone(&broker),
    });
    runners.push(QueueRunner::spawn(
        Arc::clone(&broker),
        REGIST_QUEUE,
        regist_worker,
        POLL_INTERVAL,
    ));

    let gateway = Arc::new(GatewayService {
        store: gateway_store,
        queue: Arc::clone(&broker),
        invoker,
        callbacks: Arc::clone(&callbacks),
        definitions: Repository::new(Arc::clone(&manager)).context("api repository")?,
        history: Repository::new(Arc::clone(&manager)).context("history repository")?,
    });

    let state = AppState {
        interfaces: Arc::new(interfaces),
        gateway,
        esb_appkey: config.esb.appkey.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&config.web.bind)
        .await
        .with_context(|| format!("binding {}", config.web.bind))?;
    info!(bind = %config.web.bind, "http server listening");

    axum::serve(listener, web::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("http server")?;

    info!("shutting down");
    for runner in runners {
        runner.stop().await;
    }
    callbacks.shutdown().await;
    manager.shutdown();
    Ok(())
}
