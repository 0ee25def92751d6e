use approx::assert_abs_diff_eq;
use illness_death::bundle::{ModelBundle, RunConfig};
use illness_death::matrix::closed_form_matrices;
use illness_death::simulate::ClockScale;
use illness_death::{EngineError, State, TrajectorySimulator, Transition};
use std::fs;
use tempfile::tempdir;

const BUNDLE: &str = r#"
[[table]]
transition = "1->2"
stratum = "trial-a"
covariates = ["Age", "Stage"]
labels = ["(Intercept)", "Age>4 yrs", "Stage2"]
times = [0.0, 1.0, 2.0, 4.0]
coefficients = [[0.0, 0.0, 0.0], [0.10, 0.02, 0.05], [0.18, 0.05, 0.09], [0.30, 0.08, 0.12]]
variances = [[0.0, 0.0, 0.0], [0.001, 0.0005, 0.0008], [0.002, 0.001, 0.0015], [0.004, 0.002, 0.003]]

[[table]]
transition = "1->3"
stratum = "trial-a"
covariates = ["Age", "Stage"]
labels = ["const", "Age>4 yrs", "Stage2"]
times = [0.0, 1.5, 3.0]
coefficients = [[0.0, 0.0, 0.0], [0.03, 0.01, 0.0], [0.05, 0.02, 0.01]]
variances = [[0.0, 0.0, 0.0], [0.0002, 0.0001, 0.0001], [0.0004, 0.0002, 0.0002]]

[[table]]
transition = "2->3"
stratum = "trial-a"
covariates = ["Stage"]
labels = ["(Intercept)", "Stage2"]
times = [0.0, 1.0, 2.0]
coefficients = [[0.0, 0.0], [0.2, 0.1], [0.35, 0.15]]
variances = [[0.0, 0.0], [0.01, 0.005], [0.02, 0.01]]
"#;

const RUN: &str = r#"
bundle = "model.toml"
stratum = "trial-a"
times = [0.0, 0.5, 1.0, 2.0, 3.0]

[profile]
Age = ">4 yrs"
Stage = "2"

[simulation]
replicates = 2000
seed = 7
clock = "forward"
"#;

#[test]
fn run_config_resolves_bundle_next_to_it() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("model.toml"), BUNDLE).unwrap();
    fs::write(dir.path().join("run.toml"), RUN).unwrap();

    let config = RunConfig::load(&dir.path().join("run.toml")).unwrap();
    assert_eq!(config.bundle, dir.path().join("model.toml"));
    assert_eq!(config.simulation.replicates, 2000);
    assert_eq!(config.simulation.clock, ClockScale::Forward);
    assert_eq!(config.simulation.block_size, 4096);
    assert_eq!(config.profile.level("Stage"), Some("2"));

    let bundle = ModelBundle::load(&config.bundle).unwrap();
    assert_eq!(bundle.strata(), vec!["trial-a".to_string()]);
    let model = bundle.model(&config.stratum).unwrap();
    let hazards = model.resolve(&config.profile).unwrap();

    // Intercept + Age>4 yrs + Stage2 at t = 2.
    assert_abs_diff_eq!(
        hazards.curve(Transition::Relapse).at(2.0),
        0.18 + 0.05 + 0.09,
        epsilon = 1e-12
    );
    // 2->3 declares only Stage; Age is skipped there.
    assert_abs_diff_eq!(
        hazards.curve(Transition::DeathAfterRelapse).at(1.5),
        0.3,
        epsilon = 1e-12
    );

    let matrices = closed_form_matrices(&hazards, &config.times).unwrap();
    assert_eq!(matrices.len(), 5);
    for matrix in &matrices {
        assert_abs_diff_eq!(matrix.row(State::Healthy).sum(), 1.0, epsilon = 1e-9);
    }

    let summary = TrajectorySimulator::new(&hazards, config.simulation.clone())
        .unwrap()
        .simulate(&config.times)
        .unwrap();
    assert_eq!(summary.paths().total(), 2000);
}

#[test]
fn saved_bundle_loads_back_identically() {
    let dir = tempdir().unwrap();
    let source: ModelBundle = toml::from_str(BUNDLE).unwrap();
    let model = source.model("trial-a").unwrap();

    let path = dir.path().join("saved.toml");
    ModelBundle::from_models([&model]).save(&path).unwrap();
    let reloaded = ModelBundle::load(&path).unwrap();
    assert_eq!(reloaded, source);

    let mut config: RunConfig = toml::from_str(RUN).unwrap();
    config.bundle = path.clone();
    let config_path = dir.path().join("run.toml");
    config.save(&config_path).unwrap();
    assert_eq!(RunConfig::load(&config_path).unwrap(), config);
}

#[test]
fn malformed_files_surface_typed_errors() {
    let dir = tempdir().unwrap();
    let missing = ModelBundle::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(missing, EngineError::Io(_)));

    let path = dir.path().join("broken.toml");
    fs::write(&path, "[[table]]\ntransition = \"3->1\"\n").unwrap();
    assert!(matches!(
        ModelBundle::load(&path).unwrap_err(),
        EngineError::TomlParse(_)
    ));

    let only_two = BUNDLE.replace("transition = \"2->3\"", "transition = \"1->3\"");
    let bundle: ModelBundle = toml::from_str(&only_two).unwrap();
    assert!(matches!(
        bundle.model("trial-a").unwrap_err(),
        EngineError::DuplicateTransition {
            transition: Transition::DirectDeath,
            ..
        }
    ));
}
