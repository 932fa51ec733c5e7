//! `converge wait`: poll a command until its output satisfies a condition.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Args};
use converge_common::config::parse_duration;
use converge_common::{
    CommandFetcher, CommandQuery, ConditionMatch, ConditionPoller, ConditionState, ContainsAny,
    EngineConfig, Existence, FetchError, FetchErrorPolicy, FetchProbe, OutcomeReporter,
    PollContext, PollError, PollOutcome, PollSession, PollSpec, Predicate, Probe, ProcessTask,
    RegexCount, ResourceSet, StateFetcher, Summarize,
};
use tracing::{debug, info, warn};

/// Exit status when the deadline passed without the condition holding.
const EXIT_TIMEOUT: u8 = 2;
/// Exit status when a check reported an unrecoverable state.
const EXIT_FATAL: u8 = 3;
/// Exit status when the condition held but a background command failed.
const EXIT_TASK_FAILURE: u8 = 4;
/// Exit status when the condition held under `--expect-never`.
const EXIT_UNEXPECTED: u8 = 5;
/// Exit status after Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("condition")
        .required(true)
        .args(["expect_condition", "clean_regex", "exists", "absent", "contains_any"]),
))]
#[command(after_help = "\
The command is re-run on every check. A single argument containing spaces
is run through `sh -c`; otherwise the arguments are executed directly.

Exit status: 0 success, 2 timeout, 3 fatal, 4 background task failure,
5 condition held under --expect-never, 130 interrupted.")]
pub struct WaitArgs {
    /// Time between checks (e.g. 5s, 1m) [env: CONVERGE_POLL_INTERVAL]
    #[arg(long, value_parser = parse_duration)]
    pub interval: Option<Duration>,

    /// Give up after this long [env: CONVERGE_POLL_TIMEOUT]
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Multiply the timeout, e.g. 3 on single-node clusters [env: CONVERGE_TIMEOUT_SCALE]
    #[arg(long)]
    pub timeout_scale: Option<f64>,

    /// Check once right away instead of sleeping one interval first
    #[arg(long)]
    pub immediate: bool,

    /// Consecutive satisfied checks required before succeeding
    #[arg(long, default_value_t = 1)]
    pub confirm: u32,

    /// Time between confirming checks (defaults to the interval)
    #[arg(long, value_parser = parse_duration)]
    pub confirm_gap: Option<Duration>,

    /// Kill a check that runs longer than this [env: CONVERGE_FETCH_TIMEOUT]
    #[arg(long, value_parser = parse_duration)]
    pub fetch_timeout: Option<Duration>,

    /// How long background commands get to stop once the wait ends [env: CONVERGE_TASK_GRACE]
    #[arg(long, value_parser = parse_duration)]
    pub task_grace: Option<Duration>,

    /// Expected condition as NAME=VALUE (repeatable); output is read as NAME=VALUE pairs
    #[arg(long = "expect-condition", value_name = "NAME=VALUE")]
    pub expect_condition: Vec<String>,

    /// Read the output as a Kubernetes condition list instead of NAME=VALUE pairs
    #[arg(long, requires = "expect_condition")]
    pub json_conditions: bool,

    /// Lines matching REGEX are abnormal; satisfied once none remain
    #[arg(long, value_name = "REGEX")]
    pub clean_regex: Option<String>,

    /// Lines matching REGEX are not counted as abnormal
    #[arg(long, value_name = "REGEX", requires = "clean_regex")]
    pub exclude: Option<String>,

    /// Resource that must appear in the output (repeatable)
    #[arg(long, value_name = "NAME")]
    pub exists: Vec<String>,

    /// Resource that must disappear from the output (repeatable)
    #[arg(long, value_name = "NAME")]
    pub absent: Vec<String>,

    /// Satisfied once the output contains any of these strings (repeatable)
    #[arg(long, value_name = "TEXT")]
    pub contains_any: Vec<String>,

    /// Succeed on timeout and fail if the condition ever holds
    #[arg(long)]
    pub expect_never: bool,

    /// Treat a failing check command as fatal instead of retrying
    #[arg(long)]
    pub fail_fast: bool,

    /// Shell command kept running while polling and stopped afterwards (repeatable)
    #[arg(long, value_name = "CMD")]
    pub background: Vec<String>,

    /// Shell command whose output is added to the report on failure (repeatable)
    #[arg(long, value_name = "CMD")]
    pub diagnose: Vec<String>,

    /// Name used in logs and the report
    #[arg(short, long)]
    pub description: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Command to check
    #[arg(last = true, required = true, num_args = 1.., value_name = "COMMAND")]
    pub command: Vec<String>,
}

pub async fn run(args: WaitArgs, config: EngineConfig) -> Result<ExitCode> {
    let spec = build_spec(&args, &config)?;
    let query = command_query(&args.command)?;
    let description = args
        .description
        .clone()
        .unwrap_or_else(|| query.display_masked());

    let fetch_timeout = config.fetch_timeout.clone().override_with(args.fetch_timeout);
    let grace = config.task_grace.clone().override_with(args.task_grace);
    debug!(
        fetch_timeout = %humantime::format_duration(fetch_timeout.value),
        fetch_timeout_source = %fetch_timeout.describe_source(),
        task_grace = %humantime::format_duration(grace.value),
        task_grace_source = %grace.describe_source(),
        "Wait settings"
    );
    let fetcher = CommandFetcher::new(fetch_timeout.value);

    let mut probe = build_probe(&args, fetcher.clone(), query)?;

    let mut session = PollSession::new(description.clone(), ConditionPoller::new(), grace.value);
    for (idx, script) in args.background.iter().enumerate() {
        let task = ProcessTask::shell(format!("background-{}", idx + 1), script.clone());
        session.spawn_task(task);
    }

    let ctx = PollContext::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping");
            interrupt.cancel();
        }
    });

    info!(
        description = %description,
        interval = %humantime::format_duration(spec.interval()),
        timeout = %humantime::format_duration(spec.timeout()),
        "Waiting"
    );
    let result = session.run(&ctx, &spec, probe.as_mut()).await;
    debug!(phases = ?result.phases, "Session finished");

    let mut reporter = OutcomeReporter::new().with_fetcher(fetcher);
    for (idx, script) in args.diagnose.iter().enumerate() {
        let query = CommandQuery::shell(script.clone());
        reporter = reporter.with_diagnostic(format!("diagnose-{}", idx + 1), query);
    }

    let verdict = judge(result.outcome.clone(), args.expect_never);
    let report = match (&verdict, args.expect_never) {
        // A quiet timeout is the expected result; skip diagnostics.
        (Ok(()), true) => reporter.render(&result.outcome),
        _ => reporter.report(&result.outcome).await,
    };

    if args.json {
        println!("{}", report.to_json().context("failed to serialize report")?);
    } else {
        print!("{}", report);
    }

    match verdict {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            eprintln!("converge: {}", err);
            Ok(ExitCode::from(exit_status(&err)))
        }
    }
}

/// Interval/timeout from the environment, overridden by flags.
fn build_spec(args: &WaitArgs, config: &EngineConfig) -> Result<PollSpec> {
    let interval = config.poll_interval.clone().override_with(args.interval);
    let timeout = config.poll_timeout.clone().override_with(args.timeout);
    let scale = config.timeout_scale.clone().override_with(args.timeout_scale);
    debug!(
        interval_source = %interval.describe_source(),
        timeout_source = %timeout.describe_source(),
        scale = scale.value,
        scale_source = %scale.describe_source(),
        "Poll settings"
    );

    let mut spec = PollSpec::new(interval.value, timeout.value)?;
    if args.immediate {
        spec = spec.immediate();
    }
    if args.confirm != 1 || args.confirm_gap.is_some() {
        let gap = args.confirm_gap.unwrap_or(interval.value);
        spec = spec.with_confirmations(args.confirm, gap)?;
    }
    Ok(spec.scaled(scale.value)?)
}

/// One argument with whitespace runs through the shell; several are argv.
fn command_query(command: &[String]) -> Result<CommandQuery> {
    match command {
        [] => bail!("no command given"),
        [script] if script.contains(char::is_whitespace) => Ok(CommandQuery::shell(script.clone())),
        [program, rest @ ..] => Ok(CommandQuery::new(program.clone()).args(rest.iter().cloned())),
    }
}

fn parse_expected(pairs: &[String]) -> Result<ConditionState> {
    let mut expected = ConditionState::new();
    for pair in pairs {
        let parsed = ConditionState::parse_pairs(pair)
            .with_context(|| format!("invalid --expect-condition '{}'", pair))?;
        for (name, value) in parsed.iter() {
            expected.insert(name, value);
        }
    }
    Ok(expected)
}

fn build_probe(args: &WaitArgs, fetcher: CommandFetcher, query: CommandQuery) -> Result<Box<dyn Probe>> {
    let stdout = fetcher.stdout();

    if !args.expect_condition.is_empty() {
        let expected = parse_expected(&args.expect_condition)?;
        let json = args.json_conditions;
        let conditions = stdout.map_snapshot(move |raw: String| {
            let parsed = if json {
                ConditionState::from_conditions_json(&raw)
            } else {
                ConditionState::parse_pairs(&raw)
            };
            parsed.map_err(FetchError::from)
        });
        return Ok(boxed(
            FetchProbe::new(conditions, query, ConditionMatch::new(expected)),
            args.fail_fast,
        ));
    }

    if let Some(pattern) = &args.clean_regex {
        let predicate = RegexCount::from_patterns(pattern, args.exclude.as_deref())
            .context("invalid --clean-regex/--exclude pattern")?;
        return Ok(boxed(FetchProbe::new(stdout, query, predicate), args.fail_fast));
    }

    if !args.exists.is_empty() || !args.absent.is_empty() {
        let predicate = if args.exists.is_empty() {
            Existence::absent(args.absent.clone())
        } else {
            Existence::present(args.exists.clone())
        };
        let resources = stdout.map_snapshot(|raw: String| Ok(ResourceSet::parse(&raw)));
        return Ok(boxed(FetchProbe::new(resources, query, predicate), args.fail_fast));
    }

    if !args.contains_any.is_empty() {
        let predicate = ContainsAny::new(args.contains_any.clone());
        return Ok(boxed(FetchProbe::new(stdout, query, predicate), args.fail_fast));
    }

    bail!("no condition given")
}

fn boxed<F, P>(probe: FetchProbe<F, P>, fail_fast: bool) -> Box<dyn Probe>
where
    F: StateFetcher + 'static,
    F::Query: 'static,
    F::Snapshot: Summarize,
    P: Predicate<F::Snapshot> + 'static,
{
    if fail_fast {
        Box::new(probe.with_policy(FetchErrorPolicy::Fatal))
    } else {
        Box::new(probe)
    }
}

fn judge(outcome: PollOutcome, expect_never: bool) -> Result<(), PollError> {
    let result = if expect_never {
        outcome.expect_quiet()
    } else {
        outcome.into_result()
    };
    result.map(|_| ())
}

fn exit_status(err: &PollError) -> u8 {
    match err {
        PollError::Timeout { .. } => EXIT_TIMEOUT,
        PollError::Fatal { .. } => EXIT_FATAL,
        PollError::TaskFailures { .. } => EXIT_TASK_FAILURE,
        PollError::Unexpected { .. } => EXIT_UNEXPECTED,
        PollError::Cancelled { .. } => EXIT_CANCELLED,
    }
}
