use neurite::kernels::{activation, blas, convolution, cost, pooling};
use neurite::{ActivationKind, AllocMode, CostKind, Shape, Tensor, TensorPool};

fn matrix(pool: &TensorPool, rows: &[Vec<f32>]) -> Tensor {
    Tensor::from_matrix(pool, rows).unwrap()
}

#[test]
fn relu_zeroes_negative_entries() {
    let pool = TensorPool::new();
    let x = matrix(
        &pool,
        &[
            vec![-1.0, -0.1, 2.0],
            vec![1.0, 1.0, 2.0],
            vec![0.0, -0.3, 99.0],
        ],
    );
    let y = activation::forward(&pool, &x, ActivationKind::Relu).unwrap();
    let expected = matrix(
        &pool,
        &[
            vec![0.0, 0.0, 2.0],
            vec![1.0, 1.0, 2.0],
            vec![0.0, 0.0, 99.0],
        ],
    );
    assert!(y.approx_eq(&expected));
}

#[test]
fn max_pool_2x2_picks_window_maxima() {
    let pool = TensorPool::new();
    let x = Tensor::from_vec(
        &pool,
        Shape::new(1, 1, 4, 4).unwrap(),
        &[
            -1.0, 0.0, 1.0, 2.0, //
            1.0, 1.0, 1.0, 1.0, //
            0.0, -0.3, -5.0, -0.5, //
            -1.0, 10.0, -2.0, -1.0,
        ],
    )
    .unwrap();
    let y = pooling::forward(&pool, &x).unwrap();
    assert_eq!(y.shape().dims(), [1, 1, 2, 2]);
    assert_eq!(y.as_slice(), &[1.0, 2.0, 10.0, -0.5]);
}

#[test]
fn matrix_times_matrix() {
    let pool = TensorPool::new();
    let a = matrix(&pool, &[vec![1.0, 2.0, 3.0], vec![5.0, 0.1, -2.0]]);
    let b = matrix(
        &pool,
        &[
            vec![5.0, 2.0, -1.0, 3.0],
            vec![-5.0, 2.0, -7.0, 0.9],
            vec![0.1, 0.2, -0.1, 2.0],
        ],
    );
    let y = blas::multiply(&pool, &a, &b).unwrap();
    let expected = matrix(
        &pool,
        &[
            vec![-4.7, 6.6, -15.3, 10.8],
            vec![24.3, 9.7999, -5.5, 11.09],
        ],
    );
    assert!(y.approx_eq(&expected));
}

#[test]
fn vector_times_matrix() {
    let pool = TensorPool::new();
    let a = matrix(&pool, &[vec![1.0, 2.0, 0.1, -2.0]]);
    let b = matrix(
        &pool,
        &[
            vec![1.0, 1.0, 1.0, 1.0],
            vec![0.0, 2.0, -1.0, 0.0],
            vec![1.0, 1.0, 1.0, 1.0],
            vec![0.0, 0.0, -1.0, 1.0],
        ],
    );
    let y = blas::multiply(&pool, &a, &b).unwrap();
    let expected = matrix(&pool, &[vec![1.1, 5.1, 1.1, -0.9]]);
    assert!(y.approx_eq(&expected));
}

#[test]
fn transpose_fixture() {
    let pool = TensorPool::new();
    let x = matrix(&pool, &[vec![1.0, 1.0, 1.0, 1.0], vec![0.0, 2.0, -1.0, 0.0]]);
    let y = blas::transpose(&pool, &x).unwrap();
    let expected = matrix(
        &pool,
        &[
            vec![1.0, 0.0],
            vec![1.0, 2.0],
            vec![1.0, -1.0],
            vec![1.0, 0.0],
        ],
    );
    assert!(y.approx_eq(&expected));
}

#[test]
fn double_transpose_is_the_identity_bitwise() {
    let pool = TensorPool::new();
    let x = matrix(
        &pool,
        &[vec![1.5, -2.25, 0.125], vec![3.5, 0.0, -99.75]],
    );
    let t = blas::transpose(&pool, &x).unwrap();
    let tt = blas::transpose(&pool, &t).unwrap();
    assert_eq!(x.as_slice(), tt.as_slice());
    assert_eq!(x.shape(), tt.shape());
}

#[test]
fn multiplying_by_the_identity_preserves_the_matrix() {
    let pool = TensorPool::new();
    let a = matrix(
        &pool,
        &[vec![0.5, -1.5, 2.5], vec![3.0, 4.0, -5.0], vec![0.1, 0.2, 0.3]],
    );
    let mut eye = Tensor::new(&pool, Shape::matrix(3, 3).unwrap(), AllocMode::Clean).unwrap();
    for i in 0..3 {
        eye.as_matrix_mut()[[i, i]] = 1.0;
    }
    let y = blas::multiply(&pool, &a, &eye).unwrap();
    assert!(y.approx_eq(&a));
}

#[test]
fn elementwise_sum_and_subtract() {
    let pool = TensorPool::new();
    let a = matrix(&pool, &[vec![1.0, 2.0]]);
    let b = matrix(&pool, &[vec![10.0, 20.0]]);
    let c = matrix(&pool, &[vec![100.0, 200.0]]);
    let s = blas::sum(&pool, &[&a, &b, &c]).unwrap();
    assert_eq!(s.as_slice(), &[111.0, 222.0]);
    let d = blas::subtract(&pool, &c, &b).unwrap();
    assert_eq!(d.as_slice(), &[90.0, 180.0]);
    let bad = Tensor::new(&pool, Shape::matrix(2, 1).unwrap(), AllocMode::Clean).unwrap();
    assert!(blas::sum(&pool, &[&a, &bad]).is_err());
}

#[test]
fn hadamard_product_requires_matching_shapes() {
    let pool = TensorPool::new();
    let a = matrix(&pool, &[vec![2.0, 3.0]]);
    let b = matrix(&pool, &[vec![4.0, -1.0]]);
    let p = blas::multiply_elementwise(&pool, &a, &b).unwrap();
    assert_eq!(p.as_slice(), &[8.0, -3.0]);
    let c = matrix(&pool, &[vec![1.0], vec![2.0]]);
    assert!(blas::multiply_elementwise(&pool, &a, &c).is_err());
}

#[test]
fn incompatible_matmul_shapes_fail() {
    let pool = TensorPool::new();
    let a = matrix(&pool, &[vec![1.0, 2.0]]);
    let b = matrix(&pool, &[vec![1.0, 2.0]]);
    assert!(blas::multiply(&pool, &a, &b).is_err());
}

#[test]
fn convolution_forward_cross_correlates_with_bias() {
    let pool = TensorPool::new();
    let x = Tensor::from_vec(
        &pool,
        Shape::new(1, 1, 3, 3).unwrap(),
        &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
    )
    .unwrap();
    let kernels = Tensor::from_vec(
        &pool,
        Shape::new(1, 1, 2, 2).unwrap(),
        &[1.0, 0.0, 0.0, 1.0],
    )
    .unwrap();
    let biases = Tensor::from_vec(&pool, Shape::matrix(1, 1).unwrap(), &[0.5]).unwrap();
    let y = convolution::forward(&pool, &x, &kernels, &biases).unwrap();
    assert_eq!(y.shape().dims(), [1, 1, 2, 2]);
    assert_eq!(y.as_slice(), &[6.5, 8.5, 12.5, 14.5]);
}

#[test]
fn convolution_rejects_channel_mismatch() {
    let pool = TensorPool::new();
    let x = Tensor::new(&pool, Shape::new(1, 2, 3, 3).unwrap(), AllocMode::Clean).unwrap();
    let kernels = Tensor::new(&pool, Shape::new(1, 3, 2, 2).unwrap(), AllocMode::Clean).unwrap();
    let biases = Tensor::new(&pool, Shape::matrix(1, 1).unwrap(), AllocMode::Clean).unwrap();
    assert!(convolution::forward(&pool, &x, &kernels, &biases).is_err());
}

#[test]
fn conv_bias_gradient_sums_over_samples_and_positions() {
    let pool = TensorPool::new();
    let dy = Tensor::from_vec(
        &pool,
        Shape::new(2, 1, 2, 2).unwrap(),
        &[1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0],
    )
    .unwrap();
    let db = convolution::backward_bias(&pool, &dy).unwrap();
    assert_eq!(db.as_slice(), &[12.0]);
}

#[test]
fn quadratic_cost_of_identical_predictions_is_zero() {
    let pool = TensorPool::new();
    let yhat = matrix(&pool, &[vec![0.25, 0.5], vec![0.75, 1.0]]);
    assert_eq!(cost::cost(&yhat, &yhat, CostKind::Quadratic).unwrap(), 0.0);
}

#[test]
fn log_likelihood_of_a_perfect_one_hot_is_zero() {
    let pool = TensorPool::new();
    let onehot = matrix(&pool, &[vec![0.0, 1.0], vec![1.0, 0.0]]);
    assert_eq!(
        cost::cost(&onehot, &onehot, CostKind::LogLikelihood).unwrap(),
        0.0
    );
}

#[test]
fn quadratic_cost_fixture() {
    let pool = TensorPool::new();
    let yhat = matrix(&pool, &[vec![1.0, 2.0]]);
    let y = matrix(&pool, &[vec![0.0, 4.0]]);
    // ½(1 + 4)
    assert!((cost::cost(&yhat, &y, CostKind::Quadratic).unwrap() - 2.5).abs() < 1e-6);
}
