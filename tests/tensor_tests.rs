use neurite::{AllocMode, SampleShape, Shape, Tensor, TensorPool};

#[test]
fn shape_products_are_consistent() {
    let shape = Shape::new(3, 4, 5, 6).unwrap();
    assert_eq!(shape.size(), 3 * 4 * 5 * 6);
    assert_eq!(shape.chw(), 4 * 5 * 6);
    assert_eq!(shape.hw(), 30);
    let pool = TensorPool::new();
    let t = Tensor::new(&pool, shape, AllocMode::Clean).unwrap();
    assert_eq!(t.as_slice().len(), shape.size());
    assert_eq!(t.len(), shape.size());
}

#[test]
fn zero_dimensions_are_rejected() {
    assert!(Shape::new(0, 1, 1, 1).is_err());
    assert!(Shape::new(1, 1, 0, 1).is_err());
    assert!(SampleShape::new(1, 1, 0).is_err());
}

#[test]
fn reshape_is_a_view_over_the_same_values() {
    let pool = TensorPool::new();
    let t = Tensor::from_vec(
        &pool,
        Shape::new(1, 2, 2, 2).unwrap(),
        &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
    )
    .unwrap();
    let r = t.reshape(Shape::matrix(2, 4).unwrap()).unwrap();
    assert_eq!(r.shape().dims(), [2, 1, 1, 4]);
    assert_eq!(r.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
}

#[test]
fn overwrite_requires_matching_shapes() {
    let pool = TensorPool::new();
    let mut a = Tensor::new(&pool, Shape::matrix(2, 3).unwrap(), AllocMode::Clean).unwrap();
    let b = Tensor::from_vec(&pool, Shape::matrix(2, 3).unwrap(), &[1.0; 6]).unwrap();
    let c = Tensor::new(&pool, Shape::matrix(3, 2).unwrap(), AllocMode::Clean).unwrap();
    a.overwrite(&b).unwrap();
    assert!(a.approx_eq(&b));
    assert!(a.overwrite(&c).is_err());
}

#[test]
fn duplicate_is_independent_of_the_source() {
    let pool = TensorPool::new();
    let a = Tensor::from_vec(&pool, Shape::matrix(1, 3).unwrap(), &[1.0, 2.0, 3.0]).unwrap();
    let mut d = a.duplicate(&pool).unwrap();
    d.as_slice_mut()[0] = 42.0;
    assert_eq!(a.as_slice()[0], 1.0);
    assert_eq!(d.as_slice()[0], 42.0);
}

#[test]
fn released_buffers_are_recycled_by_size() {
    let pool = TensorPool::new();
    let t = Tensor::new(&pool, Shape::matrix(8, 8).unwrap(), AllocMode::Clean).unwrap();
    t.release(&pool);
    assert_eq!(pool.retained(), 64);
    // a same-size acquisition drains the free list
    let _again = Tensor::new(&pool, Shape::new(1, 4, 4, 4).unwrap(), AllocMode::Default).unwrap();
    assert_eq!(pool.retained(), 0);
}
