//! Turns scenario files into runnable [`Script`]s
//!
//! Step and hook commands run on a shared [`ShellTarget`]. Before running,
//! `{{field}}` placeholders are filled from the iteration's data record
//! (`{{iteration}}` is always available), and the command gets
//! `SCENARIO_ITERATION` and `SCENARIO_STEP` in its environment.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::common::{Error, Result};
use crate::runtime::{
    AssertionError, Condition, Hook, HookPhase, Predicate, RecoverySequence, Script, Step,
    StepContext, TestData,
};
use crate::runtime::settings::{check_secs, secs_to_duration};
use crate::target::ShellTarget;

use super::config::{CommandExpectation, HookSpec, ScenarioFile, StepSpec};

const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Read and parse a scenario file
pub fn read_scenario(path: &Path) -> Result<ScenarioFile> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    parse_scenario(&content)
}

pub fn parse_scenario(content: &str) -> Result<ScenarioFile> {
    let scenario: ScenarioFile = serde_yaml::from_str(content)
        .map_err(|e| Error::ScriptParse(format!("Failed to parse scenario: {}", e)))?;
    validate(&scenario)?;
    Ok(scenario)
}

/// Load a scenario file and bind its commands to `target`
pub fn load_script(path: &Path, target: Arc<ShellTarget>) -> Result<Script> {
    build_script(read_scenario(path)?, target)
}

fn validate(scenario: &ScenarioFile) -> Result<()> {
    let hooks = &scenario.hooks;
    let all_hooks = hooks
        .before_all
        .iter()
        .chain(&hooks.after_all)
        .chain(&hooks.before_each)
        .chain(&hooks.after_each);
    for hook in all_hooks {
        check_secs("hook wait_timeout_secs", hook.wait_timeout_secs)
            .map_err(|e| Error::ScriptParse(format!("Hook '{}': {e}", hook.run)))?;
    }
    scenario
        .settings
        .validate()
        .map_err(|e| Error::ScriptParse(e.to_string()))?;

    if scenario.steps.is_empty() {
        return Err(Error::ScriptParse(format!(
            "Scenario '{}' has no steps",
            scenario.name
        )));
    }
    let all_steps = scenario
        .steps
        .iter()
        .chain(scenario.recovery.values().flat_map(|r| r.steps.iter()));
    for step in all_steps {
        let options = &step.options;
        if options.repeat == Some(0) {
            return Err(Error::ScriptParse(format!(
                "Step '{}': repeat must be at least 1",
                step.name
            )));
        }
        if options.if_command.is_some() && options.unless.is_some() {
            return Err(Error::ScriptParse(format!(
                "Step '{}': 'if' and 'unless' are mutually exclusive",
                step.name
            )));
        }
    }
    Ok(())
}

/// Build a [`Script`] whose steps, hooks and predicates run on `target`
pub fn build_script(scenario: ScenarioFile, target: Arc<ShellTarget>) -> Result<Script> {
    let mut settings = scenario.settings;
    if settings.name.is_none() {
        settings.name = Some(scenario.name);
    }
    if settings.description.is_none() {
        settings.description = scenario.description;
    }

    let hook_timeout = settings
        .wait_timeout_secs
        .and_then(secs_to_duration)
        .unwrap_or(DEFAULT_HOOK_TIMEOUT);

    let mut script = Script::new(settings);

    if let Some(records) = scenario.test_data {
        script = script.data(TestData::from_records(records).circular(scenario.circular));
    }

    let hooks = [
        (HookPhase::BeforeAll, scenario.hooks.before_all),
        (HookPhase::AfterAll, scenario.hooks.after_all),
        (HookPhase::BeforeEach, scenario.hooks.before_each),
        (HookPhase::AfterEach, scenario.hooks.after_each),
    ];
    for (phase, specs) in hooks {
        for spec in specs {
            script = script.hook(phase, build_hook(spec, hook_timeout, &target));
        }
    }

    for spec in scenario.steps {
        script = script.step(build_step(spec, &target));
    }

    for (name, spec) in scenario.recovery {
        let steps = spec
            .steps
            .into_iter()
            .map(|step| build_step(step, &target))
            .collect();
        let mut sequence = RecoverySequence::new(steps);
        if let Some(tries) = spec.tries {
            sequence = sequence.tries(tries);
        }
        script = script.recover(name, sequence);
    }

    script.validate()?;
    Ok(script)
}

fn build_hook(spec: HookSpec, default_timeout: Duration, target: &Arc<ShellTarget>) -> Hook {
    let timeout = spec
        .wait_timeout_secs
        .and_then(secs_to_duration)
        .unwrap_or(default_timeout);
    let command = Arc::new(spec.run);
    let target = target.clone();

    Hook::new(timeout, move |ctx: StepContext| {
        let command = command.clone();
        let target = target.clone();
        async move {
            let rendered = render(&command, &ctx)?;
            let output = target.run_with_env(&rendered, &context_env(&ctx)).await?;
            if !output.success {
                anyhow::bail!(
                    "Hook command '{}' exited with {}: {}",
                    rendered,
                    exit_label(output.code),
                    output.stderr.trim()
                );
            }
            Ok(())
        }
    })
}

fn build_step(spec: StepSpec, target: &Arc<ShellTarget>) -> Step {
    let command = Arc::new(spec.run);
    let expect = Arc::new(spec.expect.unwrap_or_default());
    let body_target = target.clone();

    let mut step = Step::new(spec.name, move |ctx: StepContext| {
        let command = command.clone();
        let expect = expect.clone();
        let target = body_target.clone();
        async move {
            let rendered = render(&command, &ctx)?;
            let output = target.run_with_env(&rendered, &context_env(&ctx)).await?;
            check_expectation(&rendered, &expect, output.success, output.code, &output.combined())?;
            Ok(())
        }
    });

    let options = spec.options;
    if options.skip {
        step = step.skip();
    }
    if options.pending {
        step = step.pending();
    }
    if options.once {
        step = step.once();
    }
    if let Some(count) = options.repeat {
        step = step.repeat(count);
    }
    if let Some(command) = options.predicate {
        step = step.predicate(gate_command(command, target));
    }
    if let Some(command) = options.if_command {
        step = step.condition(Condition::If(gate_command(command, target)));
    } else if let Some(command) = options.unless {
        step = step.condition(Condition::Unless(gate_command(command, target)));
    }
    step.settings(options.settings)
}

/// Predicate that holds when `command` exits successfully
fn gate_command(command: String, target: &Arc<ShellTarget>) -> Predicate {
    let command = Arc::new(command);
    let target = target.clone();
    Predicate::new(move |_| {
        let command = command.clone();
        let target = target.clone();
        async move { target.succeeds(&command).await }
    })
}

fn check_expectation(
    command: &str,
    expect: &CommandExpectation,
    success: bool,
    code: Option<i32>,
    output: &str,
) -> anyhow::Result<()> {
    let should_succeed = expect.success.unwrap_or(true);
    if should_succeed != success {
        return Err(AssertionError::new(format!(
            "Command '{}' expected success={}, got exit {}",
            command,
            should_succeed,
            exit_label(code)
        ))
        .into());
    }

    if let Some(expected) = &expect.output_contains {
        if !output.contains(expected.as_str()) {
            return Err(AssertionError::new(format!(
                "Output does not contain '{}'. Got: '{}'",
                expected,
                truncate(output, 200)
            ))
            .into());
        }
    }
    Ok(())
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "by signal".to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

fn context_env(ctx: &StepContext) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("SCENARIO_ITERATION".to_string(), ctx.iteration.to_string());
    env.insert("SCENARIO_STEP".to_string(), ctx.label.clone());
    env
}

/// Replace `{{field}}` placeholders from the data record
pub fn render(template: &str, ctx: &StepContext) -> anyhow::Result<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        rendered.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            anyhow::bail!("Unclosed '{{{{' in command '{}'", template);
        };
        let field = after[..end].trim();
        rendered.push_str(&lookup(field, ctx).ok_or_else(|| {
            anyhow::anyhow!("Unknown field '{}' in command '{}'", field, template)
        })?);
        rest = &after[end + 2..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

fn lookup(field: &str, ctx: &StepContext) -> Option<String> {
    if field == "iteration" {
        return Some(ctx.iteration.to_string());
    }
    let mut value = ctx.data.as_ref();
    for part in field.split('.') {
        value = value.get(part)?;
    }
    Some(match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ExecutionTarget, CancellationToken};
    use serde_json::json;

    fn ctx(data: Value) -> StepContext {
        StepContext {
            target: Arc::new(ShellTarget::new()) as Arc<dyn ExecutionTarget>,
            data: Arc::new(data),
            iteration: 2,
            label: "login".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    const SCENARIO: &str = r#"
name: demo
description: exercise the loader
settings:
  loop_count: 2
  wait_timeout_secs: 5
test_data:
  - { user: alice }
circular: true
hooks:
  before_all:
    - run: "true"
      wait_timeout_secs: 1
steps:
  - name: login
    run: echo welcome {{user}}
    expect:
      output_contains: welcome alice
  - name: search
    run: "true"
    options:
      repeat: 2
      if: "true"
  - name: later
    run: "true"
    options:
      pending: true
recovery:
  login:
    tries: 3
    steps:
      - name: relogin
        run: "true"
"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = parse_scenario(SCENARIO).unwrap();
        assert_eq!(scenario.name, "demo");
        assert_eq!(scenario.settings.loop_count, Some(2));
        assert_eq!(scenario.hooks.before_all.len(), 1);
        assert_eq!(scenario.steps.len(), 3);
        assert_eq!(scenario.steps[1].options.repeat, Some(2));
        assert_eq!(scenario.steps[1].options.if_command.as_deref(), Some("true"));
        assert_eq!(scenario.recovery["login"].tries, Some(3));
    }

    #[test]
    fn test_build_script() {
        let script = build_script(parse_scenario(SCENARIO).unwrap(), Arc::new(ShellTarget::new()))
            .unwrap();
        assert_eq!(script.step_names(), vec!["login", "search", "later"]);
        assert_eq!(script.settings.name.as_deref(), Some("demo"));
        assert_eq!(script.hooks.before_all[0].wait_timeout, Duration::from_secs(1));
        assert!(script.steps[1].options.condition.is_some());
        assert!(script.steps[2].options.pending);
        assert_eq!(script.recovery["login"].tries, Some(3));
        assert_eq!(script.data.feed(), Some(json!({ "user": "alice" })));
        assert_eq!(script.data.feed(), Some(json!({ "user": "alice" })));
    }

    #[test]
    fn test_invalid_scenarios() {
        let err = parse_scenario("name: x\nsteps: []\n").unwrap_err();
        assert!(err.to_string().contains("has no steps"));

        let err = parse_scenario(
            "name: x\nsteps:\n  - name: a\n    run: 'true'\n    options: { repeat: 0 }\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("repeat"));

        let err = parse_scenario("name: x\nstep: []\n").unwrap_err();
        assert!(matches!(err, Error::ScriptParse(_)));

        let scenario = parse_scenario(
            "name: x\nsteps:\n  - { name: a, run: 'true' }\nrecovery:\n  b: { steps: [] }\n",
        )
        .unwrap();
        let err = build_script(scenario, Arc::new(ShellTarget::new())).unwrap_err();
        assert!(matches!(err, Error::UnknownRecoveryStep(name) if name == "b"));
    }

    #[test]
    fn test_oversized_timeouts_are_rejected() {
        let err = parse_scenario(
            "name: x\nsettings: { wait_timeout_secs: 1e30 }\nsteps:\n  - { name: a, run: 'true' }\n",
        )
        .unwrap_err();
        assert!(matches!(&err, Error::ScriptParse(msg) if msg.contains("wait_timeout_secs")));

        let err = parse_scenario(
            "name: x\nhooks:\n  before_all:\n    - { run: 'true', wait_timeout_secs: 1e30 }\nsteps:\n  - { name: a, run: 'true' }\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::ScriptParse(_)));

        let scenario = parse_scenario(
            "name: x\nsteps:\n  - name: a\n    run: 'true'\n    options: { settings: { step_delay_secs: 1e30 } }\n",
        )
        .unwrap();
        let err = build_script(scenario, Arc::new(ShellTarget::new())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_render() {
        let ctx = ctx(json!({ "user": "alice", "cart": { "items": 3 }, "none": null }));
        assert_eq!(
            render("login {{user}} {{ cart.items }} #{{iteration}}{{none}}", &ctx).unwrap(),
            "login alice 3 #2"
        );
        assert_eq!(render("no placeholders", &ctx).unwrap(), "no placeholders");
        assert!(render("{{missing}}", &ctx).is_err());
        assert!(render("{{user", &ctx).is_err());
    }

    #[test]
    fn test_check_expectation() {
        let expect = CommandExpectation::default();
        assert!(check_expectation("x", &expect, true, Some(0), "").is_ok());

        let err = check_expectation("x", &expect, false, Some(1), "").unwrap_err();
        assert!(err.to_string().starts_with("AssertionError"));

        let expect = CommandExpectation {
            success: Some(false),
            output_contains: Some("denied".to_string()),
        };
        assert!(check_expectation("x", &expect, false, Some(1), "access denied").is_ok());
        assert!(check_expectation("x", &expect, false, Some(1), "ok").is_err());
    }

    #[tokio::test]
    async fn test_step_body_runs_rendered_command() {
        let target = Arc::new(ShellTarget::new());
        let step = build_step(
            StepSpec {
                name: "greet".to_string(),
                run: "echo \"hi {{user}} $SCENARIO_ITERATION $SCENARIO_STEP\"".to_string(),
                expect: None,
                options: Default::default(),
            },
            &target,
        );
        step.action.call(ctx(json!({ "user": "bob" }))).await.unwrap();
        assert_eq!(target.last_output().unwrap().stdout, "hi bob 2 login\n");
    }
}
