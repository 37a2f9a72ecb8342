use briny_mlp::modelio::{load_snapshot, save_snapshot};
use briny_mlp::{NetworkOptions, NeuralNetwork, TrainingExample, TrainingOptions, TrainingStatus, train};

fn main() -> briny_mlp::Result<()> {
    // XOR base set
    let data = [
        TrainingExample::new([0.0, 0.0], [0.0]),
        TrainingExample::new([0.0, 1.0], [1.0]),
        TrainingExample::new([1.0, 0.0], [1.0]),
        TrainingExample::new([1.0, 1.0], [0.0]),
    ];

    // model: 2 → 3 → 1
    let mut net = NeuralNetwork::new(NetworkOptions::default().with_hidden_sizes(vec![3]).with_seed(7));

    let opts = TrainingOptions {
        learning_rate: 0.5,
        callback_period: 1000,
        ..Default::default()
    };
    let mut report = |s: &TrainingStatus| println!("Iteration {:5}: error={:.6}", s.iterations, s.error);
    let status = train(&mut net, &data, &opts, Some(&mut report))?;
    println!("Stopped after {} iterations, error={:.6}", status.iterations, status.error);

    for ex in &data {
        let out = net.run(&ex.input)?;
        println!("{:?} -> {:.3} (want {})", ex.input, out[0], ex.target[0]);
    }

    save_snapshot("xor_model.bpat", &net.snapshot()?)?;
    println!("Model saved to xor_model.bpat");

    let loaded = load_snapshot("xor_model.bpat")?;
    println!("Loaded topology {:?}", loaded.sizes);
    Ok(())
}
