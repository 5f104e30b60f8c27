use crate::{
    core::ArnResolver,
    credentials,
    duration::ConfigDuration,
    index,
    k8s::{self, watcher, Api},
    resync,
    sts::StsGateway,
    Broker,
};
use anyhow::{bail, ensure, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{info, info_span, Instrument};

/// STS does not issue role credentials that are valid for less time than this.
const MIN_SESSION_DURATION: Duration = Duration::from_secs(15 * 60);

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[clap(name = "iam-broker", about = "Issues IAM role credentials to Kubernetes pods")]
pub struct Args {
    #[clap(long, default_value = "iam_broker=info,warn", env = "IAM_BROKER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Prepended to role references that are not ARNs, e.g. `arn:aws:iam::123456789012:role/`.
    #[clap(long)]
    role_base_arn: Option<String>,

    /// Derives the role ARN prefix from the account the broker runs in.
    #[clap(long)]
    role_base_arn_autodetect: bool,

    /// The session name used for pods that don't set one.
    #[clap(long, default_value = "iam-broker")]
    session_name: String,

    /// How long issued credentials are valid.
    #[clap(long, default_value = "15m")]
    session_duration: ConfigDuration,

    /// How long before credentials become invalid they are renewed.
    #[clap(long, default_value = "5m")]
    session_refresh: ConfigDuration,

    /// How often pods and namespaces are fully re-listed.
    #[clap(long, default_value = "1m")]
    pod_resync_interval: ConfigDuration,

    #[clap(long, default_value = "1000")]
    prefetch_buffer_size: usize,

    #[clap(long, default_value = "1")]
    expiring_buffer_size: usize,

    #[clap(long, default_value = "8")]
    prefetch_workers: usize,

    /// Overrides the region of the STS endpoint.
    #[clap(long)]
    sts_region: Option<String>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        self.run_with(|_| async {}).await
    }

    /// Runs the broker until the process is signaled to shut down.
    ///
    /// Once the watches and background tasks are running, `serve` is spawned with a [`Broker`]
    /// that can be used to serve credential requests.
    pub async fn run_with<S, F>(self, serve: S) -> Result<()>
    where
        S: FnOnce(Broker) -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        let cache_config = self.cache_config()?;
        let Self {
            log_level,
            log_format,
            client,
            admin,
            role_base_arn,
            pod_resync_interval,
            prefetch_buffer_size,
            prefetch_workers,
            sts_region,
            ..
        } = self;

        let mut prom = <Registry>::default();
        let workload_metrics = index::metrics::WorkloadIndexMetrics::register(
            prom.sub_registry_with_prefix("workload_index"),
        );
        let cache_metrics = credentials::CacheMetrics::register(
            prom.sub_registry_with_prefix("credentials_cache"),
        );
        let prefetch_metrics =
            credentials::PrefetchMetrics::register(prom.sub_registry_with_prefix("prefetch"));

        let gateway = StsGateway::from_env(sts_region).await;
        let role_base_arn = match role_base_arn {
            Some(arn) => arn,
            None => gateway.detect_role_base_arn().await?,
        };
        info!(%role_base_arn, "Resolving role references");
        let resolver = Arc::new(ArnResolver::new(role_base_arn));

        let (workloads, announcements) = index::workload::Index::shared(
            resolver.clone(),
            prefetch_buffer_size,
            workload_metrics,
        );
        let namespaces = index::namespace::Index::shared();
        index::metrics::register_sizes(&mut prom, workloads.clone(), namespaces.clone());

        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));
        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Spawn resource watches.

        let resync_interval = pod_resync_interval.into();
        let pods = resync::watch(
            Api::<k8s::Pod>::all(runtime.client()),
            watcher::Config::default(),
            resync_interval,
        );
        tokio::spawn(
            kubert::index::namespaced(workloads.clone(), pods).instrument(info_span!("pods")),
        );

        let nss = resync::watch(
            Api::<k8s::Namespace>::all(runtime.client()),
            watcher::Config::default(),
            resync_interval,
        );
        tokio::spawn(
            kubert::index::cluster(namespaces.clone(), nss).instrument(info_span!("namespaces")),
        );

        // Spawn the credential lifecycle tasks.

        let (cache, expiring) =
            credentials::Cache::new(cache_config, Arc::new(gateway), cache_metrics);

        let shutdown = runtime.shutdown_handle();
        tokio::spawn(
            cache
                .clone()
                .sweep(SWEEP_INTERVAL, {
                    let shutdown = shutdown.clone();
                    async move { drop(shutdown.signaled().await) }
                })
                .instrument(info_span!("sweep")),
        );

        let prefetch = credentials::Manager::new(
            resolver.clone(),
            cache.clone(),
            workloads.clone(),
            announcements,
            expiring,
            prefetch_metrics,
        );
        tokio::spawn(
            prefetch
                .run(prefetch_workers, async move {
                    drop(shutdown.signaled().await)
                })
                .instrument(info_span!("prefetch")),
        );

        tokio::spawn(serve(Broker::new(resolver, workloads, namespaces, cache)));

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks
        // to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }

    /// Validates the credential lifecycle settings.
    fn cache_config(&self) -> Result<credentials::Config> {
        ensure!(
            self.role_base_arn.is_some() != self.role_base_arn_autodetect,
            "exactly one of --role-base-arn or --role-base-arn-autodetect must be set"
        );
        if let Some(arn) = &self.role_base_arn {
            ensure!(
                arn.starts_with("arn:"),
                "--role-base-arn must be an ARN prefix, e.g. arn:aws:iam::123456789012:role/"
            );
        }

        let session_duration = Duration::from(self.session_duration);
        let session_refresh = Duration::from(self.session_refresh);
        ensure!(
            session_duration >= MIN_SESSION_DURATION,
            "--session-duration must be at least {}",
            ConfigDuration::from_secs(MIN_SESSION_DURATION.as_secs())
        );
        ensure!(
            session_refresh < session_duration,
            "--session-refresh ({}) must be less than --session-duration ({})",
            self.session_refresh,
            self.session_duration
        );
        ensure!(
            !Duration::from(self.pod_resync_interval).is_zero(),
            "--pod-resync-interval must be positive"
        );
        ensure!(self.prefetch_workers > 0, "--prefetch-workers must be positive");
        ensure!(
            self.prefetch_buffer_size > 0,
            "--prefetch-buffer-size must be positive"
        );
        ensure!(
            self.expiring_buffer_size > 0,
            "--expiring-buffer-size must be positive"
        );

        Ok(credentials::Config {
            default_session_name: self.session_name.clone(),
            session_duration,
            session_refresh,
            expiring_capacity: self.expiring_buffer_size,
        })
    }
}
