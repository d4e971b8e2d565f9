// Cold-start benchmark for the execution path
// Measures preflight analysis alone and full analyze-spawn-classify runs
// Target: analysis p95 < 5ms, bare python run p50 < 150ms

use scriptbox::{analyze, ExecutorConfig, Executor, Policy, SandboxCapability};
use std::time::{Duration, Instant};

const ITERATIONS: usize = 50;
const WARMUP_ITERATIONS: usize = 5;

const SCRIPT: &str = r#"
import json
import math

values = [math.sqrt(i) for i in range(1000)]
print(json.dumps({"sum": sum(values), "n": len(values)}))
"#;

struct LatencyStats {
    p50: Duration,
    p95: Duration,
    p99: Duration,
    min: Duration,
    max: Duration,
    mean: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();

        let p50_idx = (len as f64 * 0.50) as usize;
        let p95_idx = (len as f64 * 0.95) as usize;
        let p99_idx = (len as f64 * 0.99) as usize;

        let sum: Duration = samples.iter().sum();
        let mean = sum / len as u32;

        Self {
            p50: samples[p50_idx],
            p95: samples[p95_idx],
            p99: samples[p99_idx],
            min: samples[0],
            max: samples[len - 1],
            mean,
        }
    }

    fn print(&self, label: &str) {
        println!("\n{}", label);
        println!("  p50: {:?}", self.p50);
        println!("  p95: {:?}", self.p95);
        println!("  p99: {:?}", self.p99);
        println!("  min: {:?}", self.min);
        println!("  max: {:?}", self.max);
        println!("  mean: {:?}", self.mean);
    }
}

struct BenchmarkResult {
    scenario: String,
    stats: LatencyStats,
    failure: Option<String>,
}

impl BenchmarkResult {
    fn print(&self) {
        println!("\n=== {} ===", self.scenario);
        self.stats.print("Latency");
        match &self.failure {
            None => println!("PASS"),
            Some(reason) => println!("FAIL: {}", reason),
        }
    }
}

fn sample<F: FnMut()>(mut f: F) -> Vec<Duration> {
    for _ in 0..WARMUP_ITERATIONS {
        f();
    }
    (0..ITERATIONS)
        .map(|_| {
            let start = Instant::now();
            f();
            start.elapsed()
        })
        .collect()
}

fn benchmark_analysis(policy: &Policy) -> BenchmarkResult {
    let stats = LatencyStats::from_samples(sample(|| {
        let _ = analyze(SCRIPT, policy);
    }));

    let failure = (stats.p95 >= Duration::from_millis(5))
        .then(|| format!("p95={:?} (target <5ms)", stats.p95));
    BenchmarkResult {
        scenario: "Preflight analysis".to_string(),
        stats,
        failure,
    }
}

fn benchmark_bare_run(executor: &Executor) -> BenchmarkResult {
    let mut failed_runs = 0;
    let stats = LatencyStats::from_samples(sample(|| {
        if executor.execute(SCRIPT, None, true, None).payload().is_none() {
            failed_runs += 1;
        }
    }));

    let failure = if failed_runs > 0 {
        Some(format!("{} runs produced no payload", failed_runs))
    } else if stats.p50 >= Duration::from_millis(150) {
        Some(format!("p50={:?} (target <150ms)", stats.p50))
    } else {
        None
    };
    BenchmarkResult {
        scenario: "Python run, no OS sandbox".to_string(),
        stats,
        failure,
    }
}

fn main() {
    println!("=== scriptbox Cold-Start Benchmark ===");
    println!("Iterations: {} (after {} warmup)", ITERATIONS, WARMUP_ITERATIONS);

    let policy = Policy::default();
    let mut results = vec![benchmark_analysis(&policy)];

    let work_dir = std::env::temp_dir().join("scriptbox-bench");
    let config = ExecutorConfig {
        work_root: work_dir.join("runs"),
        artifact_dir: None,
        capability: Some(SandboxCapability::None),
        ..ExecutorConfig::default()
    };
    match Executor::new(config, policy) {
        Ok(executor) => results.push(benchmark_bare_run(&executor)),
        Err(e) => println!("\nSkipping run benchmark: {}", e),
    }

    for result in &results {
        result.print();
    }

    let passed_count = results.iter().filter(|r| r.failure.is_none()).count();
    println!("\n=== Summary ===");
    println!("{}/{} scenarios passed", passed_count, results.len());

    if passed_count != results.len() {
        std::process::exit(1);
    }
}
