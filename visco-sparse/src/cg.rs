use core::fmt;
use nalgebra::{DVector, DVectorView, DVectorViewMut, RealField, Scalar};
use nalgebra_sparse::CsrMatrix;
use std::error::Error;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

pub type OperatorError = Box<dyn Error + Send + Sync>;

pub trait LinearOperator<T: Scalar> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), OperatorError>;
}

impl<'a, T, A> LinearOperator<T> for &'a A
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), OperatorError> {
        <A as LinearOperator<T>>::apply(self, y, x)
    }
}

impl<T> LinearOperator<T> for CsrMatrix<T>
where
    T: RealField + Copy,
{
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), OperatorError> {
        assert_eq!(y.len(), self.nrows());
        assert_eq!(x.len(), self.ncols());
        for (y_i, row) in y.iter_mut().zip(self.row_iter()) {
            let mut sum = T::zero();
            for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
                sum += a_ij * x[j];
            }
            *y_i = sum;
        }
        Ok(())
    }
}

pub struct IdentityOperator;

impl<T: Scalar> LinearOperator<T> for IdentityOperator {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), OperatorError> {
        y.copy_from(&x);
        Ok(())
    }
}

/// The inner product used by CG for all reductions.
///
/// Distributed callers supply an inner product that sums the locally owned part of the
/// vectors and then reduces across processes, so that every process observes the same
/// scalars and therefore takes the same iterates.
pub trait InnerProduct<T: Scalar> {
    fn dot(&self, x: DVectorView<T>, y: DVectorView<T>) -> T;
}

impl<'a, T, I> InnerProduct<T> for &'a I
where
    T: Scalar,
    I: ?Sized + InnerProduct<T>,
{
    fn dot(&self, x: DVectorView<T>, y: DVectorView<T>) -> T {
        <I as InnerProduct<T>>::dot(self, x, y)
    }
}

/// The standard Euclidean inner product over the full vector.
#[derive(Debug, Default, Clone, Copy)]
pub struct EuclideanInnerProduct;

impl<T: RealField> InnerProduct<T> for EuclideanInnerProduct {
    fn dot(&self, x: DVectorView<T>, y: DVectorView<T>) -> T {
        x.dot(&y)
    }
}

pub trait CgStoppingCriterion<T: Scalar> {
    fn has_converged(&self, b_norm: T, iteration: usize, approx_residual_norm: T) -> Result<bool, SolveErrorKind>;
}

/// Relative residual tolerance ||r|| <= tol * ||b||.
///
/// Note that we use the *approximate* residual given by Conjugate-Gradient. For ill-conditioned
/// problems, it is possible that CG's residual converges, but the real residual does not.
#[derive(Debug, Clone, Copy)]
pub struct RelativeResidualCriterion<T: Scalar> {
    tol: T,
}

impl<T: Scalar> RelativeResidualCriterion<T> {
    pub fn new(tol: T) -> Self {
        Self { tol }
    }
}

impl Default for RelativeResidualCriterion<f64> {
    fn default() -> Self {
        Self::new(1e-8)
    }
}

impl<T> CgStoppingCriterion<T> for RelativeResidualCriterion<T>
where
    T: RealField + Copy,
{
    fn has_converged(&self, b_norm: T, _iteration: usize, approx_residual_norm: T) -> Result<bool, SolveErrorKind> {
        Ok(approx_residual_norm <= self.tol * b_norm)
    }
}

#[derive(Debug, Clone)]
#[allow(non_snake_case)]
pub struct CgWorkspace<T: Scalar> {
    r: DVector<T>,
    z: DVector<T>,
    p: DVector<T>,
    Ap: DVector<T>,
}

#[allow(non_snake_case)]
struct Buffers<'a, T: Scalar> {
    r: &'a mut DVector<T>,
    z: &'a mut DVector<T>,
    p: &'a mut DVector<T>,
    Ap: &'a mut DVector<T>,
}

impl<T: RealField> Default for CgWorkspace<T> {
    fn default() -> Self {
        Self {
            r: DVector::zeros(0),
            z: DVector::zeros(0),
            p: DVector::zeros(0),
            Ap: DVector::zeros(0),
        }
    }
}

impl<T: RealField> CgWorkspace<T> {
    fn prepare_buffers(&mut self, dim: usize) -> Buffers<T> {
        self.r.resize_vertically_mut(dim, T::zero());
        self.z.resize_vertically_mut(dim, T::zero());
        self.p.resize_vertically_mut(dim, T::zero());
        self.Ap.resize_vertically_mut(dim, T::zero());
        Buffers {
            r: &mut self.r,
            z: &mut self.z,
            p: &mut self.p,
            Ap: &mut self.Ap,
        }
    }
}

#[derive(Debug)]
enum OwnedOrMutRef<'a, T> {
    Owned(T),
    MutRef(&'a mut T),
}

impl<'a, T> Deref for OwnedOrMutRef<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

impl<'a, T> DerefMut for OwnedOrMutRef<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

#[derive(Debug)]
pub struct ConjugateGradient<'a, T, A, P, Criterion, Inner>
where
    T: Scalar,
{
    workspace: OwnedOrMutRef<'a, CgWorkspace<T>>,
    operator: A,
    preconditioner: P,
    stopping_criterion: Criterion,
    inner_product: Inner,
    max_iter: Option<usize>,
}

impl<'a, T: RealField> ConjugateGradient<'a, T, (), IdentityOperator, (), EuclideanInnerProduct> {
    pub fn new() -> Self {
        Self {
            workspace: OwnedOrMutRef::Owned(CgWorkspace::default()),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            inner_product: EuclideanInnerProduct,
            max_iter: None,
        }
    }

    pub fn with_workspace(workspace: &'a mut CgWorkspace<T>) -> Self {
        Self {
            workspace: OwnedOrMutRef::MutRef(workspace),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            inner_product: EuclideanInnerProduct,
            max_iter: None,
        }
    }
}

impl<'a, T: RealField> Default for ConjugateGradient<'a, T, (), IdentityOperator, (), EuclideanInnerProduct> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T: Scalar, P, Criterion, Inner> ConjugateGradient<'a, T, (), P, Criterion, Inner> {
    pub fn with_operator<A>(self, operator: A) -> ConjugateGradient<'a, T, A, P, Criterion, Inner> {
        ConjugateGradient {
            workspace: self.workspace,
            operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            inner_product: self.inner_product,
            max_iter: self.max_iter,
        }
    }
}

impl<'a, T: Scalar, A, P, Criterion, Inner> ConjugateGradient<'a, T, A, P, Criterion, Inner> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> ConjugateGradient<'a, T, A, P2, Criterion, Inner> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner,
            stopping_criterion: self.stopping_criterion,
            inner_product: self.inner_product,
            max_iter: self.max_iter,
        }
    }

    pub fn with_inner_product<Inner2>(
        self,
        inner_product: Inner2,
    ) -> ConjugateGradient<'a, T, A, P, Criterion, Inner2> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            inner_product,
            max_iter: self.max_iter,
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }
}

impl<'a, T: Scalar, A, P, Inner> ConjugateGradient<'a, T, A, P, (), Inner> {
    pub fn with_stopping_criterion<Criterion>(
        self,
        stopping_criterion: Criterion,
    ) -> ConjugateGradient<'a, T, A, P, Criterion, Inner> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion,
            inner_product: self.inner_product,
            max_iter: self.max_iter,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(OperatorError),
    PreconditionerError(OperatorError),
    IndefiniteOperator,
    IndefinitePreconditioner,
    MaxIterationsReached { max_iter: usize },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => write!(f, "Error applying operator: {}", err),
            Self::PreconditionerError(err) => write!(f, "Error applying preconditioner: {}", err),
            Self::IndefiniteOperator => write!(f, "Operator appears to be indefinite"),
            Self::IndefinitePreconditioner => write!(f, "Indefinite preconditioner"),
            Self::MaxIterationsReached { max_iter } => {
                write!(f, "Max iterations ({}) reached", max_iter)
            }
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError<T> {
    pub output: CgOutput<T>,
    pub kind: SolveErrorKind,
}

impl<T> SolveError<T> {
    fn new(output: CgOutput<T>, kind: SolveErrorKind) -> Self {
        Self { output, kind }
    }
}

impl<T> fmt::Display for SolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CG solve failed after {} iterations: {}",
            self.output.num_iterations, self.kind
        )
    }
}

impl<T: fmt::Debug> std::error::Error for SolveError<T> {}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct CgOutput<T> {
    /// Number of iterations of the solver.
    ///
    /// Corresponds to the number of updates made to the (initial) solution vector,
    pub num_iterations: usize,
    /// Norm of the last approximate residual computed by CG.
    pub residual_norm: Option<T>,
    marker: PhantomData<T>,
}

impl<'a, T, A, P, Criterion, Inner> ConjugateGradient<'a, T, A, P, Criterion, Inner>
where
    T: RealField + Copy,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
    Criterion: CgStoppingCriterion<T>,
    Inner: InnerProduct<T>,
{
    pub fn solve_with_guess<'b>(
        &mut self,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<CgOutput<T>, SolveError<T>> {
        self.solve_with_guess_(b.into(), x.into())
    }

    #[allow(non_snake_case)]
    fn solve_with_guess_(&mut self, b: DVectorView<T>, mut x: DVectorViewMut<T>) -> Result<CgOutput<T>, SolveError<T>> {
        use SolveErrorKind::*;
        assert_eq!(b.len(), x.len());

        let mut output = CgOutput {
            num_iterations: 0,
            residual_norm: None,
            marker: PhantomData,
        };

        let inner = &self.inner_product;
        let Buffers { r, z, p, Ap } = self.workspace.prepare_buffers(x.len());

        let b_norm = inner.dot(b, b).sqrt();
        if b_norm == T::zero() {
            x.fill(T::zero());
            output.residual_norm = Some(T::zero());
            return Ok(output);
        }

        // r = b - Ax
        if let Err(err) = self.operator.apply((&mut *r).into(), (&x).into()) {
            return Err(SolveError::new(output, OperatorError(err)));
        }
        r.axpy(T::one(), &b, -T::one());

        // z = Pr
        if let Err(err) = self.preconditioner.apply((&mut *z).into(), (&*r).into()) {
            return Err(SolveError::new(output, PreconditionerError(err)));
        }

        p.copy_from(&*z);
        let mut zTr = inner.dot((&*z).into(), (&*r).into());

        loop {
            let r_norm = inner.dot((&*r).into(), (&*r).into()).sqrt();
            output.residual_norm = Some(r_norm);

            let has_converged = match self
                .stopping_criterion
                .has_converged(b_norm, output.num_iterations, r_norm)
            {
                Ok(converged) => converged,
                Err(error_kind) => return Err(SolveError::new(output, error_kind)),
            };

            if has_converged {
                break;
            } else if let Some(max_iter) = self.max_iter {
                if output.num_iterations >= max_iter {
                    return Err(SolveError::new(output, MaxIterationsReached { max_iter }));
                }
            }

            // Ap = A * p
            if let Err(err) = self.operator.apply((&mut *Ap).into(), (&*p).into()) {
                return Err(SolveError::new(output, OperatorError(err)));
            }
            let pAp = inner.dot((&*p).into(), (&*Ap).into());

            if pAp <= T::zero() {
                return Err(SolveError::new(output, IndefiniteOperator));
            }
            if zTr <= T::zero() {
                return Err(SolveError::new(output, IndefinitePreconditioner));
            }

            let alpha = zTr / pAp;
            // x <- x + alpha * p
            x.axpy(alpha, &*p, T::one());
            // r <- r - alpha * Ap
            r.axpy(-alpha, &*Ap, T::one());

            // Number of iterations corresponds to number of updates to the x vector
            output.num_iterations += 1;

            // z <- P r
            if let Err(err) = self.preconditioner.apply((&mut *z).into(), (&*r).into()) {
                return Err(SolveError::new(output, PreconditionerError(err)));
            }
            let zTr_next = inner.dot((&*z).into(), (&*r).into());
            let beta = zTr_next / zTr;

            // p <- z + beta * p
            p.axpy(T::one(), &*z, beta);

            zTr = zTr_next;
        }

        Ok(output)
    }
}
