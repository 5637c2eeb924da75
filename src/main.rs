use clap::{Arg, Command};
use ringsim::logging::{init_logging, level_for_verbosity, parse_log_level, LogConfig, LogOutput};
use ringsim::models::{IDevice, PropertyRow, TrackParameters};
use ringsim::scenario::ScenarioConfig;
use ringsim::simulation::{RunSummary, SimulationEngine};

fn main() {
    let matches = Command::new("ringsim")
        .version("0.1.0")
        .about("リングイメージング光検出器シミュレーション")
        .long_about(
            "2次元のリングイメージング光検出器のシミュレーション\n\
             チェレンコフ光子の放射と検出をモンテカルロで再現し、\n\
             真のトラックでの対数尤度とプロファイルを評価します。",
        )
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .long_help(
                    "実行するシナリオファイル(.yaml)のパスを指定します。\n\
                     指定しない場合、組み込みの既定シナリオで実行されます。",
                ),
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオとデバイスのプロパティを表示して終了"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("N")
                .value_parser(clap::value_parser!(u64))
                .help("乱数シードを上書き"),
        )
        .arg(
            Arg::new("events")
                .short('n')
                .long("events")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("イベント数を上書き"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("ログレベル (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("OUTPUT")
                .default_value("console")
                .help("ログ出力先 (console, file, both)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)"),
        )
        .get_matches();

    let verbose_level = matches.get_count("verbose");
    let level = matches
        .get_one::<String>("log-level")
        .map(|s| parse_log_level(s))
        .unwrap_or_else(|| level_for_verbosity(verbose_level));
    let output = match matches
        .get_one::<String>("log-output")
        .map(|s| s.parse::<LogOutput>())
        .unwrap_or(Ok(LogOutput::Console))
    {
        Ok(output) => output,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
    };
    let _guard = match init_logging(LogConfig {
        level,
        output,
        ..LogConfig::default()
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("エラー: ログ初期化に失敗しました: {}", e);
            std::process::exit(1);
        }
    };

    println!("リングイメージング検出器シミュレーション - ringsim v0.1.0");
    println!();

    let overrides = Overrides {
        seed: matches.get_one::<u64>("seed").copied(),
        n_events: matches.get_one::<usize>("events").copied(),
    };
    let scenario_path = matches.get_one::<String>("scenario").map(String::as_str);

    if let Err(e) = run_scenario(scenario_path, overrides, matches.get_flag("info"), verbose_level) {
        eprintln!("エラー: {}", e);
        std::process::exit(1);
    }
}

/// コマンドラインからのシナリオ上書き
#[derive(Debug, Clone, Copy, Default)]
struct Overrides {
    seed: Option<u64>,
    n_events: Option<usize>,
}

/// シナリオを読み込んで実行
fn run_scenario(
    scenario_path: Option<&str>,
    overrides: Overrides,
    info_only: bool,
    verbose_level: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut scenario = match scenario_path {
        Some(path) => {
            let scenario = ScenarioConfig::from_file(path)?;
            if verbose_level > 0 {
                println!("シナリオファイル読み込み完了: {}", path);
            }
            scenario
        }
        None => ScenarioConfig::default(),
    };
    if let Some(seed) = overrides.seed {
        scenario.sim.seed = seed;
    }
    if let Some(n_events) = overrides.n_events {
        scenario.sim.n_events = n_events;
    }
    scenario.validate()?;

    scenario.print_summary();
    println!();

    let mut simulation = SimulationEngine::new(scenario, verbose_level);
    simulation.initialize()?;

    if info_only {
        print_devices(&simulation);
        return Ok(());
    }

    let summary = simulation.run()?;
    print_run_summary(&summary);
    Ok(())
}

/// 各デバイス種別の代表インスタンスのプロパティを表示
fn print_devices(simulation: &SimulationEngine) {
    let Some(apparatus) = simulation.apparatus() else {
        return;
    };
    let detector = &apparatus.detector;
    print_rows("検出器", &detector.property_rows());
    if let Some(module) = detector.module(0) {
        print_rows("モジュール 0", &module.property_rows());
        if let Some(sensor) = module.sensor(0) {
            print_rows("センサー 0/0", &sensor.property_rows());
        }
    }
    print_rows("エミッター", &apparatus.emitter.property_rows());
}

fn print_rows(title: &str, rows: &[PropertyRow]) {
    println!("=== {} ===", title);
    println!(
        "{:<16} {:<6} {:<8} {:>12} {:>10} {:>10} {:>14}",
        "name", "type", "dist", "mean", "sigma", "offset", "value"
    );
    for row in rows {
        println!(
            "{:<16} {:<6} {:<8} {:>12} {:>10} {:>10} {:>14}",
            row.name,
            row.property_type.to_string(),
            row.distribution.to_string(),
            row.mean.to_string(),
            row.sigma,
            row.offset,
            row.value.to_string()
        );
    }
    println!();
}

fn print_run_summary(summary: &RunSummary) {
    println!("=== 実行結果 ===");
    println!(
        "{:>5} {:>9} {:>8} {:>12}  プロファイル最大点 ({})",
        "event",
        "photons",
        "hits",
        "ln L",
        TrackParameters::NAMES.join(", ")
    );
    for e in &summary.events {
        let maxima: Vec<String> = e
            .profile_maxima()
            .iter()
            .map(|p| p.map_or("-".to_string(), |p| format!("{:.3}", p.value)))
            .collect();
        println!(
            "{:>5} {:>9} {:>8} {:>12.3}  {}{}",
            e.index,
            e.n_photons,
            e.n_hits,
            e.ln_likelihood,
            maxima.join(", "),
            if e.truncated { " (truncated)" } else { "" }
        );
    }
    println!();
    println!("平均ヒット数: {:.2}", summary.mean_hits());
    if summary.n_truncated() > 0 {
        println!("打ち切られたイベント: {}", summary.n_truncated());
    }
}
