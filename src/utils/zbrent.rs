use std::fmt;

/// The starting interval does not bracket a sign change, so no root can be
/// searched for. Carries the function values at both ends for the log.
#[derive(Debug, Clone, PartialEq)]
pub struct BracketError {
    pub f_lower: f64,
    pub f_upper: f64,
}

impl fmt::Display for BracketError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Root is not bracketed: f(lower) = {:.6e}, f(upper) = {:.6e} have the same sign",
            self.f_lower, self.f_upper
        )
    }
}

impl std::error::Error for BracketError {}

/// Find a root of `func` in the interval `[x1, x2]` with Brent's method and
/// refine it until its accuracy is `tol`. The interval must bracket a sign
/// change of `func`.
///
/// The algorithm follows:
/// Numerical Recipes in C: The Art of Scientific Computing. W. H. Press,
/// S. A. Teukolsky, W. T. Vetterling, B. P. Flannery. Cambridge University Press 1992
pub fn zbrent<F: FnMut(f64) -> f64>(
    mut func: F,
    x1: f64,
    x2: f64,
    tol: f64,
    maxiter: usize,
) -> Result<f64, BracketError> {
    let eps: f64 = f64::EPSILON.sqrt();

    let mut a: f64 = x1;
    let mut b: f64 = x2;
    let mut c: f64 = x2;
    let mut d: f64 = 0.0;
    let mut e: f64 = 0.0;

    let mut fa: f64 = func(a);
    let mut fb: f64 = func(b);
    if (fa > 0.0 && fb > 0.0) || (fa < 0.0 && fb < 0.0) {
        return Err(BracketError {
            f_lower: fa,
            f_upper: fb,
        });
    }
    let mut fc: f64 = fb;

    for _iter in 0..maxiter {
        if (fb > 0.0 && fc > 0.0) || (fb < 0.0 && fc < 0.0) {
            // rename a, b, c and adjust the bounding interval d
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }
        // convergence check
        let tol1: f64 = 2.0 * eps * b.abs() + 0.5 * tol;
        let xm: f64 = 0.5 * (c - b);
        if xm.abs() <= tol1 || fb == 0.0 {
            return Ok(b);
        }

        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            // attempt inverse quadratic interpolation
            let s: f64 = fb / fa;
            let mut p: f64;
            let mut q: f64;
            if (a - c).abs() < eps {
                p = 2.0 * xm * s;
                q = 1.0 - s;
            } else {
                q = fa / fc;
                let r: f64 = fb / fc;
                p = s * (2.0 * xm * q * (q - r) - (b - a) * (r - 1.0));
                q = (q - 1.0) * (r - 1.0) * (s - 1.0);
            }
            if p > 0.0 {
                // check whether in bounds
                q = -q;
            }
            p = p.abs();
            let min1: f64 = 3.0 * xm * q - (tol1 * q).abs();
            let min2: f64 = (e * q).abs();
            if (2.0 * p) < min1.min(min2) {
                // accept interpolation
                e = d;
                d = p / q;
            } else {
                // interpolation failed, use bisection
                d = xm;
                e = d;
            }
        } else {
            // bounds decreasing too slowly, use bisection
            d = xm;
            e = d;
        }
        a = b;
        fa = fb;
        if d.abs() > tol1 {
            b += d;
        } else if xm > 0.0 {
            b += tol1;
        } else {
            b -= tol1;
        }
        fb = func(b);
    }
    Ok(b)
}
