use he_ccfd::activation::{relu, swish};
use he_ccfd::fit::{PolynomialFitter, linspace, mean_abs_error, operating_range_samples};
use he_ccfd::{Activate, Activation, ActivationKind, PolynomialCoefficients};
use proptest::prelude::*;

#[test]
fn quartic_relu_fit_on_uniform_points() {
    let xs = linspace(-1.0, 1.0, 1000);
    let samples: Vec<(f64, f64)> = xs.iter().map(|&x| (x, relu(x))).collect();
    let p = PolynomialFitter::new(4, [-1.0, 1.0])
        .unwrap()
        .fit(&samples)
        .unwrap();

    assert_eq!(p.coefficients().len(), 5);
    assert_eq!(p.scale(), 1.0);
    assert!(p.eval(0.0).abs() < 0.1, "p(0) = {}", p.eval(0.0));
    assert!((p.eval(1.0) - 1.0).abs() < 0.2, "p(1) = {}", p.eval(1.0));
    let mae = mean_abs_error(&p, relu, &xs);
    assert!(mae < 0.05, "mae {mae}");
}

#[test]
fn scaled_fit_tracks_swish_over_the_operating_range() {
    let xs = operating_range_samples([-1.0, 1.0], 7).unwrap();
    let p = PolynomialFitter::new(4, [-1.0, 1.0])
        .unwrap()
        .with_scale(10.0)
        .unwrap()
        .fit_fn(swish, &xs)
        .unwrap();
    assert_eq!(p.scale(), 10.0);

    let raw: Vec<f64> = linspace(-2.0, 2.0, 201);
    let mae = mean_abs_error(&p, swish, &raw);
    assert!(mae < 0.5, "mae {mae}");

    // The raw-domain monomial form evaluates to the same values.
    let mono = p.to_monomial();
    for &x in &raw {
        let direct: f64 = mono
            .iter()
            .enumerate()
            .map(|(k, a)| a * x.powi(k as i32))
            .sum();
        assert!((direct - p.eval(x)).abs() < 1e-9, "x = {x}");
    }
}

#[test]
fn presets_are_polynomial_and_exact_kinds_are_not() {
    for kind in ActivationKind::ALL {
        let act = Activation::from_kind(kind);
        assert_eq!(act.kind(), kind);
        assert_eq!(act.coefficients().is_some(), kind.is_approximated());
        assert_eq!(
            act.is_he_compatible(),
            kind != ActivationKind::ReLU && kind != ActivationKind::Swish
        );
    }
    let relu_approx = Activation::from_kind(ActivationKind::ApproxReLU);
    assert_eq!(relu_approx.eval(0.0), 30.0 * 0.0243987);
}

fn coefficients() -> impl Strategy<Value = PolynomialCoefficients> {
    (
        prop::collection::vec(-2.0f64..2.0, 2..7),
        prop_oneof![Just(1.0), Just(10.0), Just(30.0), 0.5f64..50.0],
    )
        .prop_map(|(c, s)| PolynomialCoefficients::new(c, s).unwrap())
}

proptest! {
    #[test]
    fn horner_matches_direct_summation(p in coefficients(), t in -1.5f64..1.5) {
        let x = t * p.scale();
        let a = p.eval(x);
        let b = p.eval_direct(x);
        let tol = 1e-9 * (1.0 + a.abs().max(b.abs()));
        prop_assert!((a - b).abs() <= tol, "{a} vs {b}");
    }

    #[test]
    fn derivative_matches_central_difference(p in coefficients(), t in -1.5f64..1.5) {
        let x = t * p.scale();
        let h = 1e-5 * p.scale();
        let numeric = (p.eval(x + h) - p.eval(x - h)) / (2.0 * h);
        let analytic = p.derivative(x);
        prop_assert!((numeric - analytic).abs() <= 1e-4 * (1.0 + analytic.abs()));
    }
}
