use std::time::Duration;

/// Settings for the reconciler and the runner.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of concurrent worker routines.
    pub workers: usize,
    /// How long `ensure_channel` waits for a new channel to become ready.
    pub channel_ready_timeout: Duration,
    pub channel_poll_interval: Duration,
    /// Deadline for one reconcile call.
    pub reconcile_timeout: Duration,
    /// Re-enqueue delay after the first failure, doubled per consecutive failure.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Finalizer marking subscriptions whose cleanup this controller owns.
    pub finalizer: String,
    /// Namespace where channels and bindings are provisioned.
    /// `None` provisions next to each subscription.
    pub provisioning_namespace: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 4,
            channel_ready_timeout: Duration::from_secs(10),
            channel_poll_interval: Duration::from_millis(100),
            reconcile_timeout: Duration::from_secs(60),
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_secs(1000),
            finalizer: "subscription-controller".to_owned(),
            provisioning_namespace: None,
        }
    }
}

impl Config {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_channel_ready_timeout(mut self, timeout: Duration) -> Self {
        self.channel_ready_timeout = timeout;
        self
    }

    pub fn with_channel_poll_interval(mut self, interval: Duration) -> Self {
        self.channel_poll_interval = interval;
        self
    }

    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max.max(base);
        self
    }

    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizer = finalizer.into();
        self
    }

    pub fn with_provisioning_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.provisioning_namespace = Some(namespace.into());
        self
    }

    /// Namespace that holds the channel and binding of a subscription in
    /// `subscription_namespace`.
    pub fn provisioning_namespace_for<'a>(&'a self, subscription_namespace: &'a str) -> &'a str {
        self.provisioning_namespace
            .as_deref()
            .unwrap_or(subscription_namespace)
    }
}
