use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use autorules::error::CompileError;
use autorules::expression::{Bindings, CompiledExpression, Value};
use autorules::{
    EvalError, ExpressionCache, ExpressionEngine, ExpressionError, ExpressionEvent,
    ExpressionEventCategory, InMemoryTargetSource, MatchError, MatchEvaluator, Program, Target,
    TargetSnapshot, TargetSource,
};

fn snapshot(alias: &str) -> TargetSnapshot {
    TargetSnapshot::new(format!("service:jmx:rmi:///jndi/rmi://{alias}:9091/jmxrmi"), alias)
}

#[test]
fn sweep_over_labelled_targets() {
    let mut prod = Target::new(1, "service:jmx:rmi:///jndi/rmi://prod:9091/jmxrmi", "prod");
    prod.labels.insert("env".to_string(), "prod".to_string());
    prod.jvm_id = Some("jvm-prod".to_string());
    let mut dev = Target::new(2, "service:jmx:rmi:///jndi/rmi://dev:9091/jmxrmi", "dev");
    dev.labels.insert("env".to_string(), "dev".to_string());
    let bare = Target::new(3, "service:jmx:rmi:///jndi/rmi://bare:9091/jmxrmi", "bare");
    let source = InMemoryTargetSource::new(vec![prod, dev, bare]);

    let evaluator = MatchEvaluator::new();

    // `bare` has no `env` label: evaluation fails for it and it is skipped.
    let matched = evaluator
        .matched_targets("target.labels.env == 'prod'", &source)
        .unwrap();
    assert_eq!(matched.iter().map(TargetSnapshot::alias).collect::<Vec<_>>(), vec!["prod"]);

    let guarded = evaluator
        .matched_targets("has(target.labels.env) && target.labels['env'] != 'prod'", &source)
        .unwrap();
    assert_eq!(guarded.iter().map(TargetSnapshot::alias).collect::<Vec<_>>(), vec!["dev"]);

    let with_jvm = evaluator
        .matched_targets("target.jvmId != null && target.jvmId.startsWith('jvm-')", &source)
        .unwrap();
    assert_eq!(with_jvm.len(), 1);

    let all = evaluator.matched_targets("true", &source).unwrap();
    assert_eq!(all.len(), source.stream_all().count());
}

#[test]
fn applies_reports_compile_and_eval_failures() {
    let evaluator = MatchEvaluator::new();
    let target = snapshot("app");

    let Err(MatchError::Compile(CompileError::NotBoolean { .. })) =
        evaluator.applies("target.alias", &target)
    else {
        panic!("expected non-boolean compile error");
    };

    let Err(MatchError::ExpressionEvalFailed { expression, source }) =
        evaluator.applies("target.annotations.missing == 'x'", &target)
    else {
        panic!("expected evaluation failure");
    };
    assert_eq!(expression, "target.annotations.missing == 'x'");
    assert_eq!(
        source,
        EvalError::NoSuchKey {
            key: "missing".to_string()
        }
    );
}

#[test]
fn results_are_stable_until_invalidated() {
    let evaluator = MatchEvaluator::new();
    let target = snapshot("app").with_label("tier", "web");
    let expr = "target.labels.tier in ['web', 'api'] && size(target.alias) == 3";

    for _ in 0..10 {
        assert!(evaluator.applies(expr, &target).unwrap());
    }
    let stats = evaluator.cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 9);
    assert_eq!(stats.compilations, 1);

    evaluator.on_expression_event(&ExpressionEvent::new(ExpressionEventCategory::Created, expr));
    assert!(evaluator.cache().has_program(expr));

    evaluator.on_expression_event(&ExpressionEvent::new(ExpressionEventCategory::Updated, expr));
    assert!(!evaluator.cache().has_program(expr));
    assert!(evaluator.applies(expr, &target).unwrap());
    assert_eq!(evaluator.cache().stats().compilations, 2);
}

/// Delegates to the built-in compiler and counts program runs.
#[derive(Default)]
struct CountingEngine {
    runs: Arc<AtomicUsize>,
}

#[derive(Debug)]
struct CountingProgram {
    inner: CompiledExpression,
    runs: Arc<AtomicUsize>,
}

impl Program for CountingProgram {
    fn source(&self) -> &str {
        self.inner.source()
    }

    fn run<'a>(&self, bindings: &Bindings<'a>) -> Result<Value<'a>, EvalError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inner.run(bindings)
    }
}

impl ExpressionEngine for CountingEngine {
    fn compile(&self, source: &str) -> Result<Arc<dyn Program>, CompileError> {
        Ok(Arc::new(CountingProgram {
            inner: CompiledExpression::compile(source)?,
            runs: Arc::clone(&self.runs),
        }))
    }
}

#[test]
fn concurrent_sweeps_share_one_execution_per_pair() {
    let engine = CountingEngine::default();
    let runs = Arc::clone(&engine.runs);
    let cache = ExpressionCache::with_engine(engine);
    let evaluator = Arc::new(MatchEvaluator::with_cache(cache));
    let targets: Vec<TargetSnapshot> = (0..8).map(|i| snapshot(&format!("svc-{i}"))).collect();

    // Warm the cache so every later call is a hit.
    let warm = evaluator
        .matching_targets("target.alias.endsWith('-3')", targets.clone())
        .unwrap();
    assert_eq!(warm.len(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), targets.len());

    let mut workers = Vec::new();
    for _ in 0..4 {
        let evaluator = Arc::clone(&evaluator);
        let targets = targets.clone();
        workers.push(thread::spawn(move || {
            evaluator
                .matching_targets("target.alias.endsWith('-3')", targets)
                .unwrap()
                .len()
        }));
    }
    for w in workers {
        assert_eq!(w.join().unwrap(), 1);
    }
    assert_eq!(runs.load(Ordering::SeqCst), targets.len());
}

#[test]
fn long_chains_are_rejected_not_evaluated() {
    let cache = ExpressionCache::new();
    let target = snapshot("app");
    for terms in [1000, 2000, 4000] {
        let predicate = format!("{} > 0", vec!["1"; terms].join("+"));
        let Err(ExpressionError::Compile(CompileError::TooDeep { .. })) =
            cache.evaluate(&predicate, &target)
        else {
            panic!("expected nesting limit for {terms} terms");
        };
    }
    assert!(cache.is_empty());
}
