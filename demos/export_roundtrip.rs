use he_ccfd::{ActivationKind, Cnn, CnnBuilder, Tensor};

fn main() -> he_ccfd::Result<()> {
    let model = CnnBuilder::new(30)?
        .activation(ActivationKind::ApproxSwish)
        .build_with_seed(0)?;

    let path = "target/tmp_cnn.json";
    model.save_json(path)?;
    let loaded = Cnn::load_json(path)?;

    let data = (0..4 * 30).map(|i| (i as f64 * 0.1).sin()).collect();
    let x = Tensor::new(vec![4, 1, 30], data)?;
    let a = model.forward(&x)?;
    let b = loaded.forward(&x)?;

    for (name, t) in loaded.named_parameters() {
        println!("{name:<14} {:?}", t.shape());
    }
    println!("outputs:  {:?}", b.data());
    println!("identical: {}", a == b);
    Ok(())
}
