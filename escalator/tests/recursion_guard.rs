//! Recursion-guard tests for AI-assisted validators whose own calls are
//! validated by nested retry loops.
//!
//! Layout used by every test:
//! ```text
//! outer run (depth 0)
//! └── fact_check judge ── calls ──> ValidatedCaller (depth 1)
//!                                   ├── secondary model
//!                                   └── verdict_check judge ── calls ──> tertiary model (depth 2)
//! ```

use std::sync::Arc;

use escalator::caller::LlmCaller;
use escalator::core::retry_config::RetryConfig;
use escalator::core::validation::kinds;
use escalator::orchestrator::{Orchestrator, Outcome, ValidatedCaller};
use escalator::test_support::{ScriptedCaller, question};
use escalator::validators::Validator;
use escalator::validators::ai_assisted::{AiAssistedValidator, DEFAULT_TEMPLATE};

const VALID: &str = r#"{"valid": true, "explanation": "matches reference", "confidence": 0.9}"#;

struct Harness {
    main_model: ScriptedCaller,
    secondary: Arc<ScriptedCaller>,
    tertiary: Arc<ScriptedCaller>,
    validators: Vec<Validator>,
}

fn harness(inner_max_depth: u32, nested: RetryConfig) -> Harness {
    let secondary = Arc::new(ScriptedCaller::responses(vec![VALID; 5]));
    let tertiary = Arc::new(ScriptedCaller::responses([VALID]));

    let verdict_check =
        AiAssistedValidator::new("verdict_check", tertiary.clone(), DEFAULT_TEMPLATE)
            .expect("verdict_check")
            .with_max_depth(inner_max_depth);
    let validated: Arc<dyn LlmCaller> = Arc::new(ValidatedCaller::new(
        Orchestrator::default(),
        vec![Validator::ai_assisted(verdict_check)],
        nested,
        secondary.clone(),
    ));
    let fact_check = AiAssistedValidator::new("fact_check", validated, DEFAULT_TEMPLATE)
        .expect("fact_check");

    Harness {
        main_model: ScriptedCaller::responses(["Paris"]),
        secondary,
        tertiary,
        validators: vec![Validator::ai_assisted(fact_check)],
    }
}

/// A validator inside a validator's call at the depth limit refuses to call,
/// and the refusal propagates up as `recursion_limit_exceeded`.
///
/// Expected sequence:
/// 1. Main model answers at depth 0.
/// 2. `fact_check` (depth 0 < 1) calls the validated caller at depth 1.
/// 3. Secondary model answers at depth 1.
/// 4. `verdict_check` sees depth 1 >= 1 → refuses without calling the tertiary model.
/// 5. Nested run fails → outer `fact_check` reports `recursion_limit_exceeded`.
#[tokio::test]
async fn nested_validator_at_depth_limit_refuses() {
    let h = harness(1, RetryConfig::immediate(1, 1, 1));

    let outcome = Orchestrator::default()
        .run(
            &question("What is the capital of France?"),
            &h.validators,
            &RetryConfig::immediate(1, 1, 1),
            &h.main_model,
        )
        .await
        .expect("run");

    let Outcome::Exhausted {
        accumulated_errors, ..
    } = &outcome
    else {
        panic!("expected exhausted, got {outcome:?}");
    };
    assert_eq!(accumulated_errors.len(), 1);
    assert_eq!(accumulated_errors[0].validator, "fact_check");
    assert_eq!(
        accumulated_errors[0].result.kind(),
        Some(kinds::RECURSION_LIMIT_EXCEEDED)
    );

    assert_eq!(h.main_model.depths(), vec![0]);
    assert_eq!(h.secondary.depths(), vec![1]);
    assert_eq!(h.tertiary.call_count(), 0);
}

/// Raising the nested validator's limit lets the chain complete, with the
/// depth counter incremented at each validator hop.
#[tokio::test]
async fn deeper_limit_allows_one_more_level() {
    let h = harness(2, RetryConfig::immediate(1, 1, 1));

    let outcome = Orchestrator::default()
        .run(
            &question("What is the capital of France?"),
            &h.validators,
            &RetryConfig::immediate(1, 1, 1),
            &h.main_model,
        )
        .await
        .expect("run");

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(h.main_model.depths(), vec![0]);
    assert_eq!(h.secondary.depths(), vec![1]);
    assert_eq!(h.tertiary.depths(), vec![2]);

    let tertiary_sent = h.tertiary.requests();
    let tertiary_prompt = &tertiary_sent[0].messages[0].content;
    assert!(tertiary_prompt.contains("matches reference"));
}

/// A recursion refusal is terminal: neither the nested run nor the outer run
/// retries it, even with attempts to spare on both levels.
#[tokio::test]
async fn recursion_refusal_is_not_retried() {
    let h = harness(1, RetryConfig::immediate(5, 2, 5));

    let outcome = Orchestrator::default()
        .run(
            &question("What is the capital of France?"),
            &h.validators,
            &RetryConfig::immediate(3, 2, 3),
            &h.main_model,
        )
        .await
        .expect("run");

    assert!(matches!(outcome, Outcome::Exhausted { .. }), "{outcome:?}");
    assert_eq!(
        outcome.accumulated_errors()[0].result.kind(),
        Some(kinds::RECURSION_LIMIT_EXCEEDED)
    );
    assert_eq!(h.main_model.call_count(), 1);
    assert_eq!(h.secondary.call_count(), 1);
    assert_eq!(h.tertiary.call_count(), 0);
}

/// Sibling AI-assisted validators in one attempt each call at `depth + 1`;
/// neither sees the other's call as nesting.
#[tokio::test]
async fn sibling_validators_share_the_run_depth() {
    let first_model = Arc::new(ScriptedCaller::responses([VALID]));
    let second_model = Arc::new(ScriptedCaller::responses([VALID]));
    let validators = vec![
        Validator::ai_assisted(
            AiAssistedValidator::new("accuracy", first_model.clone(), DEFAULT_TEMPLATE)
                .expect("accuracy"),
        ),
        Validator::ai_assisted(
            AiAssistedValidator::new("tone", second_model.clone(), DEFAULT_TEMPLATE)
                .expect("tone"),
        ),
    ];
    let main_model = ScriptedCaller::responses(["Paris"]);

    let outcome = Orchestrator::default()
        .run(
            &question("What is the capital of France?"),
            &validators,
            &RetryConfig::immediate(1, 1, 1),
            &main_model,
        )
        .await
        .expect("run");

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(main_model.depths(), vec![0]);
    assert_eq!(first_model.depths(), vec![1]);
    assert_eq!(second_model.depths(), vec![1]);
}
