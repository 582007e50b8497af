use resilience_policy::{PolicyExecutor, ResilienceConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

struct WarnCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn unknown_policy_warns_once_per_name() {
    let warnings = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&warnings)));

    tracing::subscriber::with_default(subscriber, || {
        let executor = PolicyExecutor::new(ResilienceConfig::default());

        for _ in 0..10 {
            assert_eq!(executor.policy(Some("databse")).name(), "default");
        }
        assert_eq!(warnings.load(Ordering::SeqCst), 1);

        assert_eq!(executor.policy(Some("extrenal")).name(), "default");
        assert_eq!(warnings.load(Ordering::SeqCst), 2);

        assert_eq!(executor.policy(Some("database")).name(), "database");
        assert_eq!(warnings.load(Ordering::SeqCst), 2);
    });
}

#[test]
fn manual_overrides_are_logged() {
    let warnings = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&warnings)));

    tracing::subscriber::with_default(subscriber, || {
        let executor = PolicyExecutor::new(ResilienceConfig::default());
        executor.open_circuit("api");
        executor.close_circuit("api");
    });

    assert_eq!(warnings.load(Ordering::SeqCst), 2);
}
