//! Pearson correlation with a two-sided significance test.
//!
//! The p-value is the Student's t test with n - 2 degrees of freedom,
//! written through the regularized incomplete beta function:
//! `p = I_{1 - r²}((n - 2) / 2, 1 / 2)`.
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correlation {
    /// Pearson r. NaN when fewer than two pairs or either series is constant.
    pub coefficient: f64,
    pub p_value: f64,
    /// Number of pairs the statistic was computed over.
    pub n: usize,
}

impl Correlation {
    fn undefined(n: usize) -> Self {
        Self { coefficient: f64::NAN, p_value: f64::NAN, n }
    }

    pub fn is_defined(&self) -> bool {
        !self.coefficient.is_nan()
    }
}

/// Pearson r between paired samples. Pairs where either side is not finite are dropped.
pub fn pearson(pairs: impl IntoIterator<Item = (f64, f64)>) -> Correlation {
    let (xs, ys): (Vec<f64>, Vec<f64>) = pairs
        .into_iter()
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .unzip();
    let n = xs.len();
    if n < 2 {
        return Correlation::undefined(n);
    }

    let nf = n as f64;
    let mean_x = xs.iter().sum::<f64>() / nf;
    let mean_y = ys.iter().sum::<f64>() / nf;

    let mut cov = 0f64;
    let mut var_x = 0f64;
    let mut var_y = 0f64;
    for (x, y) in xs.iter().zip(&ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return Correlation::undefined(n);
    }

    let r = (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0);

    // Two points always lie on a line.
    let p_value = if n == 2 {
        1.0
    } else {
        let df = nf - 2.0;
        regularized_incomplete_beta(df / 2.0, 0.5, 1.0 - r * r)
    };

    Correlation { coefficient: r, p_value, n }
}

/// ln Γ(x), Lanczos approximation (g = 7, n = 9).
fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let t = x + G + 0.5;
    let a = COEF
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEF[0], |acc, (i, c)| acc + c / (x + i as f64));
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// I_x(a, b).
fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Continued fraction for I_x(a, b), modified Lentz's method.
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 300;
    const EPS: f64 = 1e-15;
    const TINY: f64 = 1e-300;

    let guard = |v: f64| if v.abs() < TINY { TINY } else { v };

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 / guard(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / guard(1.0 + aa * d);
        c = guard(1.0 + aa / c);
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / guard(1.0 + aa * d);
        c = guard(1.0 + aa / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}
