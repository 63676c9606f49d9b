//! End-to-end tests: expression trees compiled and run on the host

use scalarjit_engine::expr::{ArithmeticKind, ComparisonKind, LogicalKind, SqlType, TypeInfo, UnaryKind};
use scalarjit_engine::{
    CodegenError, CompilationOptions, Datum, DomainError, Evaluation, Expr, OptLevel, ScalarCodeGenerator,
};

fn int() -> TypeInfo {
    TypeInfo::not_null(SqlType::Int)
}

fn nullable(kind: SqlType) -> TypeInfo {
    TypeInfo::nullable(kind)
}

fn eval_with(expr: &Expr, options: &CompilationOptions, inputs: &[Datum]) -> Evaluation {
    let generator = ScalarCodeGenerator::new();
    let compiled = generator.compile(expr, true, options).unwrap();
    let native = generator.generate_native_code(&compiled, options).unwrap();
    native.invoke(inputs).unwrap()
}

fn eval(expr: &Expr, inputs: &[Datum]) -> Evaluation {
    eval_with(expr, &CompilationOptions::default(), inputs)
}

fn add(ty: TypeInfo, left: Expr, right: Expr) -> Expr {
    Expr::arith(ArithmeticKind::Add, ty, left, right)
}

#[test]
fn test_constant() {
    let result = eval(&Expr::literal(Datum::Int(42)), &[]);
    assert_eq!(result, Evaluation { error_code: 0, value: Datum::Int(42) });
}

#[test]
fn test_constant_sum() {
    let expr = add(int(), Expr::literal(Datum::Int(42)), Expr::literal(Datum::Int(42)));
    assert_eq!(eval(&expr, &[]).value, Datum::Int(84));
}

#[test]
fn test_single_column() {
    let generator = ScalarCodeGenerator::new();
    let options = CompilationOptions::default();
    let compiled = generator.compile(&Expr::column(int(), 1, 1, 0), true, &options).unwrap();
    assert_eq!(compiled.inputs().len(), 1);

    let native = generator.generate_native_code(&compiled, &options).unwrap();
    assert_eq!(native.entry_points().len(), 1);
    assert_eq!(native.invoke(&[Datum::Int(17)]).unwrap().value, Datum::Int(17));
}

#[test]
fn test_column_plus_constant() {
    let expr = add(int(), Expr::column(int(), 1, 1, 0), Expr::literal(Datum::Int(42)));
    let result = eval(&expr, &[Datum::Int(58)]);
    assert!(result.is_ok());
    assert_eq!(result.value, Datum::Int(100));
}

#[test]
fn test_repeated_column_uses_one_slot() {
    let col = Expr::column(int(), 3, 7, 0);
    let expr = Expr::arith(ArithmeticKind::Mul, int(), col.clone(), col);
    let generator = ScalarCodeGenerator::new();
    let compiled = generator.compile(&expr, true, &CompilationOptions::default()).unwrap();
    assert_eq!(compiled.inputs().len(), 1);

    let native = generator.generate_native_code(&compiled, &CompilationOptions::default()).unwrap();
    assert_eq!(native.invoke(&[Datum::Int(-9)]).unwrap().value, Datum::Int(81));
}

#[test]
fn test_direct_entry_point_abi() {
    let expr = add(int(), Expr::column(int(), 1, 1, 0), Expr::column(int(), 1, 2, 0));
    let generator = ScalarCodeGenerator::new();
    let compiled = generator.compile(&expr, true, &CompilationOptions::default()).unwrap();
    let native = generator.generate_native_code(&compiled, &CompilationOptions::default()).unwrap();
    let entry = native.entry_points()[0].host_function().unwrap();

    let func: extern "C" fn(*mut i32, *mut i32, i32, i32) = unsafe { std::mem::transmute(entry) };
    let mut error = -1;
    let mut result = 0;
    func(&mut error, &mut result, 40, 2);
    assert_eq!((error, result), (0, 42));

    func(&mut error, &mut result, i32::MAX, 1);
    assert_eq!(error, DomainError::Overflow.code());
}

#[test]
fn test_overflow() {
    for ty in [SqlType::SmallInt, SqlType::Int, SqlType::BigInt] {
        let max = match ty {
            SqlType::SmallInt => Datum::SmallInt(i16::MAX),
            SqlType::Int => Datum::Int(i32::MAX),
            _ => Datum::BigInt(i64::MAX),
        };
        let one = match ty {
            SqlType::SmallInt => Datum::SmallInt(1),
            SqlType::Int => Datum::Int(1),
            _ => Datum::BigInt(1),
        };
        let tyi = TypeInfo::not_null(ty);
        let expr = add(tyi, Expr::column(tyi, 1, 1, 0), Expr::literal(one));
        let result = eval(&expr, &[max]);
        assert_eq!(result.domain_error(), Some(DomainError::Overflow), "{}", ty);
    }
}

#[test]
fn test_checked_multiplication_and_negation() {
    let big = TypeInfo::not_null(SqlType::BigInt);
    let expr = Expr::arith(ArithmeticKind::Mul, big, Expr::column(big, 1, 1, 0), Expr::column(big, 1, 2, 0));
    assert_eq!(eval(&expr, &[Datum::BigInt(1 << 31), Datum::BigInt(1 << 31)]).value, Datum::BigInt(1 << 62));
    assert_eq!(
        eval(&expr, &[Datum::BigInt(1 << 32), Datum::BigInt(1 << 31)]).domain_error(),
        Some(DomainError::Overflow)
    );
    assert_eq!(eval(&expr, &[Datum::BigInt(-3), Datum::BigInt(5)]).value, Datum::BigInt(-15));

    let neg = Expr::unary(UnaryKind::Negate, int(), Expr::column(int(), 1, 1, 0));
    assert_eq!(eval(&neg, &[Datum::Int(5)]).value, Datum::Int(-5));
    assert_eq!(eval(&neg, &[Datum::Int(i32::MIN)]).domain_error(), Some(DomainError::Overflow));
}

#[test]
fn test_division() {
    let div = Expr::arith(ArithmeticKind::Div, int(), Expr::column(int(), 1, 1, 0), Expr::column(int(), 1, 2, 0));
    assert_eq!(eval(&div, &[Datum::Int(17), Datum::Int(5)]).value, Datum::Int(3));
    assert_eq!(eval(&div, &[Datum::Int(-17), Datum::Int(5)]).value, Datum::Int(-3));
    assert_eq!(eval(&div, &[Datum::Int(17), Datum::Int(-1)]).value, Datum::Int(-17));
    assert_eq!(eval(&div, &[Datum::Int(17), Datum::Int(0)]).domain_error(), Some(DomainError::DivideByZero));
    assert_eq!(eval(&div, &[Datum::Int(i32::MIN), Datum::Int(-1)]).domain_error(), Some(DomainError::Overflow));

    let rem = Expr::arith(ArithmeticKind::Mod, int(), Expr::column(int(), 1, 1, 0), Expr::column(int(), 1, 2, 0));
    assert_eq!(eval(&rem, &[Datum::Int(-17), Datum::Int(5)]).value, Datum::Int(-2));
    assert_eq!(eval(&rem, &[Datum::Int(i32::MIN), Datum::Int(-1)]).value, Datum::Int(0));
    assert_eq!(eval(&rem, &[Datum::Int(1), Datum::Int(0)]).domain_error(), Some(DomainError::DivideByZero));

    let double = TypeInfo::not_null(SqlType::Double);
    let fdiv = Expr::arith(ArithmeticKind::Div, double, Expr::column(double, 1, 1, 0), Expr::literal(Datum::Double(0.0)));
    assert_eq!(eval(&fdiv, &[Datum::Double(1.0)]).domain_error(), Some(DomainError::DivideByZero));
}

#[test]
fn test_first_error_wins() {
    // (a / 0) + (MAX + 1): division fails first
    let div = Expr::arith(ArithmeticKind::Div, int(), Expr::column(int(), 1, 1, 0), Expr::literal(Datum::Int(0)));
    let overflow = add(int(), Expr::literal(Datum::Int(i32::MAX)), Expr::literal(Datum::Int(1)));
    let expr = add(int(), div.clone(), overflow.clone());
    assert_eq!(eval(&expr, &[Datum::Int(1)]).domain_error(), Some(DomainError::DivideByZero));

    let expr = add(int(), overflow, div);
    assert_eq!(eval(&expr, &[Datum::Int(1)]).domain_error(), Some(DomainError::Overflow));
}

#[test]
fn test_null_propagation() {
    let ty = nullable(SqlType::Int);
    let expr = add(ty, Expr::column(ty, 1, 1, 0), Expr::literal(Datum::Int(1)));
    assert_eq!(eval(&expr, &[Datum::Int(41)]).value, Datum::Int(42));
    assert_eq!(eval(&expr, &[Datum::Null]).value, Datum::Null);

    let expr = add(ty, Expr::column(ty, 1, 1, 0), Expr::column(ty, 1, 2, 0));
    assert_eq!(eval(&expr, &[Datum::Int(1), Datum::Int(2)]).value, Datum::Int(3));
    assert_eq!(eval(&expr, &[Datum::Null, Datum::Int(2)]).value, Datum::Null);
    assert!(eval(&expr, &[Datum::Null, Datum::Int(2)]).is_ok());

    // NULL / 0 is NULL, not an error
    let div = Expr::arith(ArithmeticKind::Div, ty, Expr::column(ty, 1, 1, 0), Expr::column(ty, 1, 2, 0));
    let result = eval(&div, &[Datum::Null, Datum::Int(0)]);
    assert_eq!(result, Evaluation { error_code: 0, value: Datum::Null });
}

#[test]
fn test_nullable_comparison_and_is_null() {
    let ty = nullable(SqlType::Double);
    let lt = Expr::compare(ComparisonKind::Lt, Expr::column(ty, 1, 1, 0), Expr::column(ty, 1, 2, 0));
    assert_eq!(eval(&lt, &[Datum::Double(1.0), Datum::Double(2.0)]).value, Datum::Bool(true));
    assert_eq!(eval(&lt, &[Datum::Double(3.0), Datum::Double(2.0)]).value, Datum::Bool(false));
    assert_eq!(eval(&lt, &[Datum::Null, Datum::Double(2.0)]).value, Datum::Null);

    let is_null = Expr::unary(UnaryKind::IsNull, TypeInfo::not_null(SqlType::Boolean), Expr::column(ty, 1, 1, 0));
    assert_eq!(eval(&is_null, &[Datum::Null]).value, Datum::Bool(true));
    assert_eq!(eval(&is_null, &[Datum::Double(0.5)]).value, Datum::Bool(false));

    let null_literal = Expr::unary(UnaryKind::IsNull, TypeInfo::not_null(SqlType::Boolean), Expr::null(ty));
    assert_eq!(eval(&null_literal, &[]).value, Datum::Bool(true));
}

#[test]
fn test_logical_and_not() {
    let boolean = TypeInfo::not_null(SqlType::Boolean);
    let gt = Expr::compare(ComparisonKind::Gt, Expr::column(int(), 1, 1, 0), Expr::literal(Datum::Int(10)));
    let lt = Expr::compare(ComparisonKind::Lt, Expr::column(int(), 1, 1, 0), Expr::literal(Datum::Int(20)));
    let between = Expr::logical(LogicalKind::And, gt, lt);
    assert_eq!(eval(&between, &[Datum::Int(15)]).value, Datum::Bool(true));
    assert_eq!(eval(&between, &[Datum::Int(25)]).value, Datum::Bool(false));

    let not = Expr::unary(UnaryKind::Not, boolean, between);
    assert_eq!(eval(&not, &[Datum::Int(25)]).value, Datum::Bool(true));
}

#[test]
fn test_casts() {
    let small = TypeInfo::not_null(SqlType::SmallInt);
    let to_small = Expr::cast(SqlType::SmallInt, Expr::column(int(), 1, 1, 0));
    assert_eq!(eval(&to_small, &[Datum::Int(-300)]).value, Datum::SmallInt(-300));
    assert_eq!(eval(&to_small, &[Datum::Int(40_000)]).domain_error(), Some(DomainError::Overflow));

    let double = TypeInfo::not_null(SqlType::Double);
    let to_int = Expr::cast(SqlType::Int, Expr::column(double, 1, 1, 0));
    assert_eq!(eval(&to_int, &[Datum::Double(-2.9)]).value, Datum::Int(-2));
    assert_eq!(eval(&to_int, &[Datum::Double(3.0e10)]).domain_error(), Some(DomainError::Overflow));
    assert_eq!(eval(&to_int, &[Datum::Double(f64::NAN)]).domain_error(), Some(DomainError::Overflow));
    assert_eq!(eval(&to_int, &[Datum::Double(-2147483648.5)]).value, Datum::Int(i32::MIN));
    assert_eq!(eval(&to_int, &[Datum::Double(-2147483649.0)]).domain_error(), Some(DomainError::Overflow));

    // Truncation toward zero: both ends accept a fractional excess
    let double_to_small = Expr::cast(SqlType::SmallInt, Expr::column(double, 1, 1, 0));
    assert_eq!(eval(&double_to_small, &[Datum::Double(-32768.5)]).value, Datum::SmallInt(i16::MIN));
    assert_eq!(eval(&double_to_small, &[Datum::Double(32767.5)]).value, Datum::SmallInt(i16::MAX));
    assert_eq!(eval(&double_to_small, &[Datum::Double(-32769.0)]).domain_error(), Some(DomainError::Overflow));
    assert_eq!(eval(&double_to_small, &[Datum::Double(32768.0)]).domain_error(), Some(DomainError::Overflow));

    let float = TypeInfo::not_null(SqlType::Float);
    let float_to_int = Expr::cast(SqlType::Int, Expr::column(float, 1, 1, 0));
    assert_eq!(eval(&float_to_int, &[Datum::Float(-2147483648.0)]).value, Datum::Int(i32::MIN));

    let aggressive = CompilationOptions::default().with_opt_level(OptLevel::Aggressive);
    let folded = Expr::cast(SqlType::SmallInt, Expr::literal(Datum::Double(-32768.5)));
    assert_eq!(eval_with(&folded, &aggressive, &[]).value, Datum::SmallInt(i16::MIN));
    let folded = Expr::cast(SqlType::Int, Expr::literal(Datum::Double(-2147483648.5)));
    assert_eq!(eval_with(&folded, &aggressive, &[]).value, Datum::Int(i32::MIN));
    let folded = Expr::cast(SqlType::SmallInt, Expr::literal(Datum::Double(-32769.0)));
    assert_eq!(eval_with(&folded, &aggressive, &[]).domain_error(), Some(DomainError::Overflow));

    let widen = Expr::cast(SqlType::Double, Expr::column(small, 1, 1, 0));
    assert_eq!(eval(&widen, &[Datum::SmallInt(-7)]).value, Datum::Double(-7.0));

    let to_bool = Expr::cast(SqlType::Boolean, Expr::column(int(), 1, 1, 0));
    assert_eq!(eval(&to_bool, &[Datum::Int(3)]).value, Datum::Bool(true));

    let same = Expr::cast(SqlType::Int, Expr::column(int(), 1, 1, 0));
    assert_eq!(eval(&same, &[Datum::Int(9)]).value, Datum::Int(9));
}

#[test]
fn test_float_arithmetic() {
    let float = TypeInfo::not_null(SqlType::Float);
    let expr = Expr::arith(ArithmeticKind::Mul, float, Expr::column(float, 1, 1, 0), Expr::literal(Datum::Float(0.5)));
    assert_eq!(eval(&expr, &[Datum::Float(3.0)]).value, Datum::Float(1.5));

    let huge = Expr::arith(ArithmeticKind::Mul, float, Expr::column(float, 1, 1, 0), Expr::literal(Datum::Float(f32::MAX)));
    assert_eq!(eval(&huge, &[Datum::Float(2.0)]).value, Datum::Float(f32::INFINITY));
}

#[test]
fn test_hoisted_literals_reuse_artifact() {
    let expr = add(int(), Expr::column(int(), 1, 1, 0), Expr::literal(Datum::Int(42)));
    let options = CompilationOptions::default().with_hoist_literals(true);
    let generator = ScalarCodeGenerator::new();
    let compiled = generator.compile(&expr, true, &options).unwrap();
    assert_eq!(compiled.hoisted_literals().len(), 1);

    let native = generator.generate_native_code(&compiled, &options).unwrap();
    let mut args = vec![Datum::Int(58)];
    args.extend(compiled.literal_values());
    assert_eq!(native.invoke(&args).unwrap().value, Datum::Int(100));
    assert_eq!(native.invoke(&[Datum::Int(58), Datum::Int(-8)]).unwrap().value, Datum::Int(50));
}

#[test]
fn test_equal_literals_not_deduplicated() {
    let expr = add(int(), Expr::literal(Datum::Int(7)), Expr::literal(Datum::Int(7)));
    let options = CompilationOptions::default().with_hoist_literals(true);
    let compiled = ScalarCodeGenerator::new().compile(&expr, true, &options).unwrap();
    assert_eq!(compiled.hoisted_literals().len(), 2);
}

#[test]
fn test_opt_levels_agree() {
    let big = TypeInfo::not_null(SqlType::BigInt);
    let expr = Expr::arith(
        ArithmeticKind::Sub,
        big,
        Expr::arith(ArithmeticKind::Mul, big, Expr::column(big, 1, 1, 0), Expr::literal(Datum::BigInt(3))),
        Expr::arith(ArithmeticKind::Mod, big, Expr::literal(Datum::BigInt(100)), Expr::column(big, 1, 2, 0)),
    );
    let cases = [
        [Datum::BigInt(5), Datum::BigInt(7)],
        [Datum::BigInt(i64::MAX), Datum::BigInt(3)],
        [Datum::BigInt(-4), Datum::BigInt(0)],
    ];
    for inputs in &cases {
        let baseline = eval_with(&expr, &CompilationOptions::default().with_opt_level(OptLevel::None), inputs);
        for level in [OptLevel::Default, OptLevel::Aggressive] {
            let options = CompilationOptions::default().with_opt_level(level);
            assert_eq!(eval_with(&expr, &options, inputs), baseline, "{:?}", level);
        }
        let debug = CompilationOptions::default().with_debug(true);
        assert_eq!(eval_with(&expr, &debug, inputs), baseline);
    }
}

#[test]
fn test_native_code_generated_twice() {
    let generator = ScalarCodeGenerator::new();
    let options = CompilationOptions::default();
    let compiled = generator.compile(&Expr::literal(Datum::Int(5)), true, &options).unwrap();
    let first = generator.generate_native_code(&compiled, &options).unwrap();
    let second = generator.generate_native_code(&compiled, &options).unwrap();
    drop(first);
    assert_eq!(second.invoke(&[]).unwrap().value, Datum::Int(5));
}

#[test]
fn test_invocation_errors() {
    let generator = ScalarCodeGenerator::new();
    let options = CompilationOptions::default();
    let compiled = generator.compile(&Expr::column(int(), 1, 1, 0), true, &options).unwrap();
    let native = generator.generate_native_code(&compiled, &options).unwrap();
    assert!(matches!(native.invoke(&[]), Err(CodegenError::Invocation(_))));
    assert!(matches!(native.invoke(&[Datum::Double(1.0)]), Err(CodegenError::Invocation(_))));
    assert!(matches!(native.invoke(&[Datum::Null]), Err(CodegenError::Invocation(_))));
    assert!(matches!(native.invoke_on_device(0, &[Datum::Int(1)]), Err(CodegenError::Invocation(_))));
}

#[test]
fn test_concurrent_compiles() {
    let generator = ScalarCodeGenerator::new();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let generator = &generator;
                scope.spawn(move || {
                    let expr = add(int(), Expr::column(int(), 1, 1, 0), Expr::literal(Datum::Int(i)));
                    let options = CompilationOptions::default();
                    let compiled = generator.compile(&expr, true, &options).unwrap();
                    let native = generator.generate_native_code(&compiled, &options).unwrap();
                    native.invoke(&[Datum::Int(100)]).unwrap().value
                })
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), Datum::Int(100 + i as i32));
        }
    });
}
