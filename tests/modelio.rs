use briny_mlp::modelio::{load_snapshot, save_snapshot};
use briny_mlp::{Backend, NetworkError, NetworkOptions, NeuralNetwork};

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("briny_mlp_{}_{name}.bpat", std::process::id()))
}

#[test]
fn test_bpat_save_and_load() {
    let mut net = NeuralNetwork::new(
        NetworkOptions::default()
            .with_hidden_sizes(vec![4, 3])
            .with_seed(17)
            .with_backend(Backend::Cpu),
    );
    net.initialize(3, 2, false).unwrap();
    net.train_step(&[0.1, 0.5, 0.9], &[1.0, 0.0], 0.3, 0.1).unwrap();

    let path = temp_path("roundtrip");
    let original = net.snapshot().unwrap();
    save_snapshot(&path, &original).unwrap();
    let loaded = load_snapshot(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(loaded, original);

    let mut restored = NeuralNetwork::from_snapshot(loaded, NetworkOptions::default()).unwrap();
    assert_eq!(restored.run(&[0.3, 0.3, 0.3]).unwrap(), net.run(&[0.3, 0.3, 0.3]).unwrap());
}

#[test]
fn test_restored_network_resumes_training() {
    let mut net = NeuralNetwork::new(NetworkOptions::default().with_seed(2));
    net.initialize(2, 1, false).unwrap();

    let path = temp_path("resume");
    save_snapshot(&path, &net.snapshot().unwrap()).unwrap();
    let mut restored = NeuralNetwork::from_snapshot(load_snapshot(&path).unwrap(), NetworkOptions::default()).unwrap();
    std::fs::remove_file(&path).unwrap();

    restored.initialize(2, 1, true).unwrap();
    let a = net.train_step(&[1.0, 0.0], &[1.0], 0.3, 0.1).unwrap();
    let b = restored.train_step(&[1.0, 0.0], &[1.0], 0.3, 0.1).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_load_rejects_foreign_file() {
    let path = temp_path("foreign");
    std::fs::write(&path, b"not a model at all").unwrap();
    let err = load_snapshot(&path).unwrap_err();
    std::fs::remove_file(&path).unwrap();
    assert!(matches!(err, NetworkError::InvalidModel(_)));
}

#[test]
fn test_load_missing_file_is_io_error() {
    let err = load_snapshot(temp_path("missing")).unwrap_err();
    assert!(matches!(err, NetworkError::Io(_)));
}
