//! xctr - A command-line orchestrator for running XCTest bundles on iOS
//! real devices and simulators.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use log::{error, info};

use xctr::managers::device::sdk_for_device;
use xctr::managers::xcode::Xcode;
use xctr::models::{ExitCode, LaunchOptions, Platform, RunnerError, SigningOptions, TestType};
use xctr::session::simulator_run::run_simulator_test;
use xctr::session::{PrepareInputs, XctestSession};
use xctr::utils::command::CommandRunner;
use xctr::utils::command_executor::CommandExecutor;
use xctr::utils::setup_logger;

#[derive(Parser)]
#[command(
    name = "xctr",
    version,
    about = "Runs XCTest, XCUITest and logic-test bundles on iOS real devices and simulators"
)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Arguments shared by every run mode.
#[derive(Args)]
struct CommonArgs {
    /// The path of the application to be tested.
    #[arg(long = "app_under_test_path")]
    app_under_test_path: Option<PathBuf>,

    /// The path of the test bundle that contains the tests.
    #[arg(long = "test_bundle_path")]
    test_bundle_path: Option<PathBuf>,

    /// The path of an xctestrun file. When given, bundle staging and
    /// xctestrun generation are skipped; launch options still override
    /// fields of the file.
    #[arg(long = "xctestrun")]
    xctestrun: Option<PathBuf>,

    /// The type of the test bundle. Detected from the bundle when omitted.
    #[arg(long = "test_type", value_enum)]
    test_type: Option<TestType>,

    /// The path of a JSON file with options of launching the test.
    #[arg(long = "launch_options_json_path")]
    launch_options_json_path: Option<PathBuf>,

    /// The path of a JSON file with options of signing the app.
    #[arg(long = "signing_options_json_path")]
    signing_options_json_path: Option<PathBuf>,

    /// The directory of runfiles, including the bundles and the generated
    /// xctestrun file. A given directory is not deleted after the test
    /// ends.
    #[arg(long = "work_dir")]
    work_dir: Option<PathBuf>,

    /// The directory where derived data will go. A given directory is not
    /// deleted after the test ends.
    #[arg(long = "output_dir")]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run test directly on a connected iOS real device or an existing iOS
    /// simulator.
    Test {
        /// The id of the target device. It can name a real device or a
        /// simulator.
        #[arg(long)]
        id: String,

        /// The platform of the device. Resolved from the id when omitted.
        #[arg(long, value_enum)]
        platform: Option<Platform>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run test on a newly created simulator, which is deleted after the
    /// test finishes.
    #[command(name = "simulator_test")]
    SimulatorTest {
        /// The device type of the simulator to run test, as listed by
        /// `xcrun simctl list devicetypes`. Defaults to the newest
        /// supported iPhone.
        #[arg(long = "device_type")]
        device_type: Option<String>,

        /// The OS version of the simulator to run test, as listed by
        /// `xcrun simctl list runtimes`. Defaults to the newest version
        /// the chosen device type supports.
        #[arg(long = "os_version")]
        os_version: Option<String>,

        /// The name prefix of the new simulator. The full name is
        /// "<prefix>-<device type>-<os version>".
        #[arg(long = "new_simulator_name_prefix")]
        new_simulator_name_prefix: Option<String>,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = setup_logger(cli.verbose) {
        eprintln!("{e}");
        std::process::exit(ExitCode::GeneralError.code());
    }

    let exit_code = run(cli.command).await;
    info!("Done.");
    std::process::exit(exit_code);
}

async fn run(command: Commands) -> i32 {
    if which::which("xcrun").is_err() {
        error!(
            "Xcode Command Line Tools not found. Please install Xcode or run \
             'xcode-select --install'."
        );
        return ExitCode::GeneralError.code();
    }
    let executor: Arc<dyn CommandExecutor> = Arc::new(CommandRunner::new());
    let xcode = Arc::new(Xcode::new(executor.clone()));

    match command {
        Commands::Test {
            id,
            platform,
            common,
        } => match run_device_test(&executor, &xcode, &id, platform, &common).await {
            Ok(exit_code) => log_and_code(exit_code),
            Err(e) => {
                error!("{e}");
                ExitCode::GeneralError.code()
            }
        },
        Commands::SimulatorTest {
            device_type,
            os_version,
            new_simulator_name_prefix,
            common,
        } => {
            match run_new_simulator_test(
                &executor,
                &xcode,
                device_type.as_deref(),
                os_version.as_deref(),
                new_simulator_name_prefix.as_deref(),
                &common,
            )
            .await
            {
                Ok(exit_code) => log_and_code(exit_code),
                Err(RunnerError::Sim(e)) => {
                    error!("Simulator error: {e}");
                    ExitCode::SimError.code()
                }
                Err(e) => {
                    error!("{e}");
                    ExitCode::GeneralError.code()
                }
            }
        }
    }
}

fn log_and_code(exit_code: ExitCode) -> i32 {
    info!("{exit_code}");
    exit_code.code()
}

fn prepare_inputs(common: &CommonArgs) -> Result<PrepareInputs, RunnerError> {
    let signing_options = match &common.signing_options_json_path {
        Some(path) => SigningOptions::from_json_file(path)?,
        None => SigningOptions::default(),
    };
    Ok(PrepareInputs {
        app_under_test: common.app_under_test_path.clone(),
        test_bundle: common.test_bundle_path.clone(),
        xctestrun_file: common.xctestrun.clone(),
        test_type: common.test_type,
        signing_options,
    })
}

fn launch_options(common: &CommonArgs) -> Result<LaunchOptions, RunnerError> {
    match &common.launch_options_json_path {
        Some(path) => LaunchOptions::from_json_file(path),
        None => Ok(LaunchOptions::default()),
    }
}

async fn run_device_test(
    executor: &Arc<dyn CommandExecutor>,
    xcode: &Arc<Xcode>,
    device_id: &str,
    platform: Option<Platform>,
    common: &CommonArgs,
) -> Result<ExitCode, RunnerError> {
    let sdk = match platform {
        Some(platform) => platform.sdk(),
        None => sdk_for_device(executor, device_id).await?,
    };
    let mut session = XctestSession::new(
        sdk,
        executor.clone(),
        xcode.clone(),
        common.work_dir.as_deref(),
        common.output_dir.as_deref(),
    )?;
    let result = async {
        session.prepare(prepare_inputs(common)?).await?;
        session.set_launch_options(launch_options(common)?)?;
        session.run_test(device_id).await
    }
    .await;
    session.close();
    result
}

async fn run_new_simulator_test(
    executor: &Arc<dyn CommandExecutor>,
    xcode: &Arc<Xcode>,
    device_type: Option<&str>,
    os_version: Option<&str>,
    name_prefix: Option<&str>,
    common: &CommonArgs,
) -> Result<ExitCode, RunnerError> {
    let mut session = XctestSession::new(
        xctr::models::Sdk::Iphonesimulator,
        executor.clone(),
        xcode.clone(),
        common.work_dir.as_deref(),
        common.output_dir.as_deref(),
    )?;
    let result = async {
        session.prepare(prepare_inputs(common)?).await?;
        session.set_launch_options(launch_options(common)?)?;
        run_simulator_test(&mut session, device_type, os_version, name_prefix).await
    }
    .await;
    session.close();
    result
}
