use faer::{Col, ColRef, unzip, zip};

use crate::E;

pub(crate) fn cwise_multiply(x1: ColRef<'_, E>, x2: ColRef<'_, E>) -> Col<E> {
    let mut out = Col::<E>::zeros(x1.nrows());

    zip!(x1, x2, out.as_mut()).for_each(|unzip!(x1, x2, out)| *out = *x1 * *x2);

    out
}

pub(crate) fn cwise_inverse(x: ColRef<'_, E>) -> Col<E> {
    let mut out = Col::<E>::zeros(x.nrows());

    zip!(x, out.as_mut()).for_each(|unzip!(x, out)| *out = 1. / *x);

    out
}

/// Copies `src` into `dst`.
pub(crate) fn copy_to(src: ColRef<'_, E>, dst: &mut Col<E>) {
    zip!(dst.as_mut(), src).for_each(|unzip!(dst, src)| *dst = *src);
}

/// `y <- alpha * x + y`.
pub(crate) fn axpy(alpha: E, x: ColRef<'_, E>, y: &mut Col<E>) {
    zip!(y.as_mut(), x).for_each(|unzip!(y, x)| *y += alpha * *x);
}

pub(crate) fn fill(x: &mut Col<E>, value: E) {
    zip!(x.as_mut()).for_each(|unzip!(x)| *x = value);
}

pub(crate) fn dot(x1: ColRef<'_, E>, x2: ColRef<'_, E>) -> E {
    let mut sum = 0.;

    zip!(x1, x2).for_each(|unzip!(x1, x2)| sum += *x1 * *x2);

    sum
}

pub(crate) fn inf_norm(x: ColRef<'_, E>) -> E {
    let mut norm = 0.;

    zip!(x).for_each(|unzip!(x)| norm = E::max(norm, x.abs()));

    norm
}

/// Infinity norm of `diag(d) * x`.
pub(crate) fn scaled_inf_norm(d: ColRef<'_, E>, x: ColRef<'_, E>) -> E {
    let mut norm = 0.;

    zip!(d, x).for_each(|unzip!(d, x)| norm = E::max(norm, (*d * *x).abs()));

    norm
}

pub(crate) fn norm_2(x: ColRef<'_, E>) -> E {
    let mut sum = 0.;

    zip!(x).for_each(|unzip!(x)| sum += *x * *x);

    sum.sqrt()
}

/// Elementwise projection of `x` onto the box `[l, u]`. Infinite bounds
/// disable the corresponding side.
pub(crate) fn clip(x: &mut Col<E>, l: ColRef<'_, E>, u: ColRef<'_, E>) {
    zip!(x.as_mut(), l, u).for_each(|unzip!(x, l, u)| *x = E::min(E::max(*x, *l), *u));
}

pub(crate) fn is_col_positive(x: ColRef<'_, E>) -> bool {
    let mut res = true;
    zip!(x).for_each(|unzip!(x)| {
        if !(*x > 0.) || !x.is_finite() {
            res = false
        }
    });
    res
}

pub(crate) fn all_finite(x: ColRef<'_, E>) -> bool {
    let mut res = true;
    zip!(x).for_each(|unzip!(x)| {
        if !x.is_finite() {
            res = false
        }
    });
    res
}
