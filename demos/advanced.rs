//! Advanced Policy Engine Example
//!
//! This example demonstrates:
//! 1. Loading the resilience settings from JSON
//! 2. Using hooks for monitoring circuit transitions
//! 3. The strict `external` policy tripping on its first failure
//! 4. Manual circuit overrides
//! 5. The synchronous retry-only path

use resilience_policy::{ExecutionError, HookRegistry, PolicyExecutor, PolicyName, ResilienceConfig};
use std::error::Error;
use std::fmt;
use std::time::Duration;

// Custom error type that implements Error trait
#[derive(Debug)]
struct ServiceError(String);

impl ServiceError {
    fn new(msg: &str) -> Self {
        ServiceError(msg.to_string())
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl Error for ServiceError {}

const SETTINGS: &str = r#"{
    "CircuitBreaker": { "Enabled": true, "ExceptionsAllowedBeforeBreaking": 4, "DurationOfBreakSeconds": 20 },
    "RetryPolicy": { "MaxRetries": 2, "BaseDelaySeconds": 1, "MaxDelaySeconds": 10, "ExponentialBackoff": true },
    "Timeout": { "DefaultTimeoutSeconds": 15, "HttpClientTimeoutSeconds": 45, "LongRunningTimeoutSeconds": 600 }
}"#;

fn report(result: Result<String, ExecutionError<ServiceError>>) {
    match result {
        Ok(response) => println!("Service response: {}", response),
        Err(ExecutionError::CircuitOpen { policy }) => {
            println!("Circuit {} open, call not attempted", policy)
        }
        Err(ExecutionError::Timeout { after, .. }) => println!("Timed out after {:?}", after),
        Err(ExecutionError::Action(err)) => println!("Service error: {}", err),
    }
}

#[tokio::main(flavor = "current_thread", start_paused = true)]
async fn main() {
    println!("=== Advanced Policy Engine Example ===\n");

    // 1. Settings as they would come from an application config file
    let config: ResilienceConfig = serde_json::from_str(SETTINGS).unwrap();

    // 2. Hooks for observability
    let hooks = HookRegistry::new();
    hooks.set_on_open(|policy| println!("Circuit {} OPENED", policy));
    hooks.set_on_close(|policy| println!("Circuit {} CLOSED", policy));
    hooks.set_on_half_open(|policy| println!("Circuit {} HALF-OPEN, probing", policy));

    let executor = PolicyExecutor::builder().config(config).hooks(hooks).build();

    for name in PolicyName::ALL {
        let policy = executor.policy(Some(name.as_str()));
        println!(
            "{:<9} threshold={} break={:?} retries={} timeout={:?}",
            policy.name(),
            policy.failure_threshold(),
            policy.break_duration(),
            policy.retry_count(),
            policy.timeout()
        );
    }

    // 3. External dependencies trip on their first failure
    println!("\n--- external ---");
    report(
        executor
            .execute_policy_async(PolicyName::External, || async {
                Err(ServiceError::new("Partner API returned 503"))
            })
            .await,
    );
    report(
        executor
            .execute_policy_async(PolicyName::External, || async { Ok("never runs".to_string()) })
            .await,
    );

    tokio::time::sleep(Duration::from_secs(300)).await;
    report(
        executor
            .execute_policy_async(PolicyName::External, || async { Ok("recovered".to_string()) })
            .await,
    );

    // 4. Operator kill switch
    println!("\n--- manual override ---");
    executor.open_circuit("api");
    report(
        executor
            .execute_async(Some("api"), || async { Ok("blocked".to_string()) })
            .await,
    );
    executor.close_circuit("api");
    report(
        executor
            .execute_async(Some("api"), || async { Ok("allowed".to_string()) })
            .await,
    );

    // 5. Sync callers only get retries
    println!("\n--- sync ---");
    let mut attempts = 0;
    let result: Result<String, ServiceError> = executor.execute(|| {
        attempts += 1;
        if attempts < 3 {
            Err(ServiceError::new("lock contention"))
        } else {
            Ok(format!("done after {} attempts", attempts))
        }
    });
    println!("{:?}", result);

    println!("\n=== Example Completed ===");
}
