use std::{
    array,
    ops::{Add, Div, Mul, Sub},
};

use bytemuck::NoUninit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Vec<T, const N: usize>([T; N]);

impl<T: Copy> Vec<T, 2> {
    pub fn x(self) -> T {
        self.0[0]
    }

    pub fn y(self) -> T {
        self.0[1]
    }
}

impl<const N: usize> Vec<f32, N> {
    pub fn dot(self, other: Self) -> f32 {
        self.0.iter().zip(&other.0).map(|(&a, &b)| a * b).sum()
    }

    pub fn dist(self, other: Self) -> f32 {
        (other - self).length()
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.0.iter().all(|c| c.is_finite())
    }
}

// Safety: `[T; N]` has no padding iff `T` has no padding.
unsafe impl<T: NoUninit, const N: usize> NoUninit for Vec<T, N> {}

pub type Vec2<T> = Vec<T, 2>;
pub type Vec2f = Vec2<f32>;
pub type Vec2u = Vec2<u32>;

impl<T, const N: usize> From<[T; N]> for Vec<T, N> {
    fn from(value: [T; N]) -> Self {
        Self(value)
    }
}

impl<T, const N: usize> From<Vec<T, N>> for [T; N] {
    fn from(value: Vec<T, N>) -> Self {
        value.0
    }
}

impl From<Vec2u> for Vec2f {
    fn from(value: Vec2u) -> Self {
        vec2(value.x() as f32, value.y() as f32)
    }
}

impl<T, const N: usize> Add<Vec<T, N>> for Vec<T, N>
where
    T: Add<Output = T> + Copy,
{
    type Output = Vec<T, N>;

    fn add(self, rhs: Vec<T, N>) -> Self::Output {
        Vec(array::from_fn(|i| self.0[i] + rhs.0[i]))
    }
}

impl<T, const N: usize> Sub<Vec<T, N>> for Vec<T, N>
where
    T: Sub<Output = T> + Copy,
{
    type Output = Vec<T, N>;

    fn sub(self, rhs: Vec<T, N>) -> Self::Output {
        Vec(array::from_fn(|i| self.0[i] - rhs.0[i]))
    }
}

impl<T, const N: usize> Mul<Vec<T, N>> for Vec<T, N>
where
    T: Mul<Output = T> + Copy,
{
    type Output = Vec<T, N>;

    fn mul(self, rhs: Vec<T, N>) -> Self::Output {
        Vec(array::from_fn(|i| self.0[i] * rhs.0[i]))
    }
}

impl<T, const N: usize> Mul<T> for Vec<T, N>
where
    T: Mul<Output = T> + Copy,
{
    type Output = Vec<T, N>;

    fn mul(self, rhs: T) -> Self::Output {
        Vec(array::from_fn(|i| self.0[i] * rhs))
    }
}

impl<T, const N: usize> Div<Vec<T, N>> for Vec<T, N>
where
    T: Div<Output = T> + Copy,
{
    type Output = Vec<T, N>;

    fn div(self, rhs: Vec<T, N>) -> Self::Output {
        Vec(array::from_fn(|i| self.0[i] / rhs.0[i]))
    }
}

impl<T, const N: usize> Div<T> for Vec<T, N>
where
    T: Div<Output = T> + Copy,
{
    type Output = Vec<T, N>;

    fn div(self, rhs: T) -> Self::Output {
        Vec(array::from_fn(|i| self.0[i] / rhs))
    }
}

pub fn vec2<T>(x: T, y: T) -> Vec2<T> {
    Vec([x, y])
}

/// Axis-aligned rectangle, `origin` being the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub origin: Vec2f,
    pub size: Vec2f,
}

impl Rect {
    pub const ZERO: Rect = Rect {
        origin: Vec([0.0; 2]),
        size: Vec([0.0; 2]),
    };

    pub fn new(origin: Vec2f, size: Vec2f) -> Self {
        Self { origin, size }
    }

    pub fn contains(&self, p: Vec2f) -> bool {
        let rel = p - self.origin;
        (0.0..self.size.x()).contains(&rel.x()) && (0.0..self.size.y()).contains(&rel.y())
    }

    /// Splits the rectangle into `n` equally wide columns separated by `gap`.
    pub fn columns(&self, n: usize, gap: f32) -> impl Iterator<Item = Rect> + '_ {
        let n_f = n as f32;
        let width = ((self.size.x() - gap * (n_f - 1.0)) / n_f).max(0.0);
        (0..n).map(move |i| Rect {
            origin: self.origin + vec2((width + gap) * i as f32, 0.0),
            size: vec2(width, self.size.y()),
        })
    }

    /// Largest rectangle with the aspect ratio of `content`, centered inside `self`.
    pub fn fit(&self, content: Vec2f) -> Rect {
        if content.x() <= 0.0 || content.y() <= 0.0 {
            return Rect::new(self.origin, vec2(0.0, 0.0));
        }
        let scale = (self.size.x() / content.x()).min(self.size.y() / content.y());
        let size = content * scale.max(0.0);
        Rect {
            origin: self.origin + (self.size - size) / 2.0,
            size,
        }
    }

    pub fn inset(&self, by: f32) -> Rect {
        Rect {
            origin: self.origin + vec2(by, by),
            size: vec2(
                (self.size.x() - 2.0 * by).max(0.0),
                (self.size.y() - 2.0 * by).max(0.0),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_letterboxes_wide_panel() {
        let panel = Rect::new(vec2(0.0, 0.0), vec2(800.0, 300.0));
        let fitted = panel.fit(vec2(1280.0, 720.0));
        assert!((fitted.size.y() - 300.0).abs() < 1e-3);
        assert!((fitted.size.x() - 533.333).abs() < 1e-2);
        assert!((fitted.origin.x() - 133.333).abs() < 1e-2);
        assert_eq!(fitted.origin.y(), 0.0);
    }

    #[test]
    fn columns_split_with_gap() {
        let area = Rect::new(vec2(10.0, 0.0), vec2(210.0, 50.0));
        let cols: std::vec::Vec<_> = area.columns(2, 10.0).collect();
        assert_eq!(cols[0], Rect::new(vec2(10.0, 0.0), vec2(100.0, 50.0)));
        assert_eq!(cols[1], Rect::new(vec2(120.0, 0.0), vec2(100.0, 50.0)));
    }

    #[test]
    fn contains_is_half_open() {
        let r = Rect::new(vec2(0.0, 0.0), vec2(10.0, 10.0));
        assert!(r.contains(vec2(0.0, 9.9)));
        assert!(!r.contains(vec2(10.0, 5.0)));
        assert!(!r.contains(vec2(-0.1, 5.0)));
    }
}
