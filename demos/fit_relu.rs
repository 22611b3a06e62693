use he_ccfd::activation::relu;
use he_ccfd::fit::{PolynomialFitter, linspace, mean_abs_error, operating_range_samples};
use he_ccfd::PolynomialCoefficients;

fn main() -> he_ccfd::Result<()> {
    let scale = 30.0;
    let fitter = PolynomialFitter::new(4, [-1.0, 1.0])?.with_scale(scale)?;
    let xs = operating_range_samples([-1.0, 1.0], 0)?;
    let fitted = fitter.fit_fn(relu, &xs)?;
    let preset = PolynomialCoefficients::relu_quartic();

    println!("fitted coefficients: {:?}", fitted.coefficients());
    println!("preset coefficients: {:?}", preset.coefficients());
    println!("monomial form:       {:?}", fitted.to_monomial());

    for (lo, hi) in [(-3.0, 3.0), (-15.0, 15.0), (-30.0, 30.0)] {
        let grid = linspace(lo, hi, 601);
        println!(
            "[{lo:>5}, {hi:>4}]  fitted mae {:.4}  preset mae {:.4}",
            mean_abs_error(&fitted, relu, &grid),
            mean_abs_error(&preset, relu, &grid)
        );
    }
    Ok(())
}
