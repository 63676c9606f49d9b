//! Accelerator backend on host-emulated devices
#![cfg(unix)]

use std::sync::Arc;

use scalarjit_engine::device::HostEmulatedDevices;
use scalarjit_engine::expr::{ArithmeticKind, SqlType, TypeInfo};
use scalarjit_engine::{
    CodegenConfig, CodegenError, CompilationOptions, Datum, DeviceRuntime, DeviceTarget, DeviceType,
    DomainError, Expr, ScalarCodeGenerator,
};

fn int() -> TypeInfo {
    TypeInfo::not_null(SqlType::Int)
}

fn generator(devices: &Arc<HostEmulatedDevices>, parallel: bool) -> ScalarCodeGenerator {
    let config = CodegenConfig { parallel_device_compilation: parallel, ..Default::default() };
    let runtime: Arc<dyn DeviceRuntime> = devices.clone();
    ScalarCodeGenerator::with_config(config).unwrap().with_devices(runtime)
}

#[test]
fn test_one_entry_point_per_device() {
    let devices = Arc::new(HostEmulatedDevices::new(4));
    for parallel in [false, true] {
        let generator = generator(&devices, parallel);
        let expr = Expr::arith(ArithmeticKind::Add, int(), Expr::column(int(), 1, 1, 0), Expr::literal(Datum::Int(42)));
        let options = CompilationOptions::accelerator();
        let compiled = generator.compile(&expr, true, &options).unwrap();
        let native = generator.generate_native_code(&compiled, &options).unwrap();
        assert_eq!(native.device_type(), DeviceType::Accelerator);

        let entries = native.entry_points();
        assert_eq!(entries.len(), 4);
        for (i, entry) in entries.iter().enumerate() {
            let (device, _) = entry.device_kernel().unwrap();
            assert_eq!(device, i);
            assert!(entry.host_function().is_none());
            let result = native.invoke_on_device(device, &[Datum::Int(58)]).unwrap();
            assert_eq!(result.value, Datum::Int(100));
        }
        assert!(matches!(native.invoke(&[Datum::Int(58)]), Err(CodegenError::Invocation(_))));
    }
}

#[test]
fn test_device_results_match_host() {
    let devices = Arc::new(HostEmulatedDevices::new(2));
    let generator = generator(&devices, true);
    let big = TypeInfo::nullable(SqlType::BigInt);
    let expr = Expr::arith(ArithmeticKind::Div, big, Expr::column(big, 1, 1, 0), Expr::column(big, 1, 2, 0));

    let host_options = CompilationOptions::default();
    let device_options = CompilationOptions::accelerator();
    let host = generator
        .generate_native_code(&generator.compile(&expr, true, &host_options).unwrap(), &host_options)
        .unwrap();
    let accel = generator
        .generate_native_code(&generator.compile(&expr, true, &device_options).unwrap(), &device_options)
        .unwrap();

    let cases = [
        vec![Datum::BigInt(100), Datum::BigInt(7)],
        vec![Datum::BigInt(100), Datum::BigInt(0)],
        vec![Datum::BigInt(i64::MIN + 1), Datum::BigInt(-1)],
        vec![Datum::Null, Datum::BigInt(3)],
    ];
    for inputs in &cases {
        let expected = host.invoke(inputs).unwrap();
        for device in 0..2 {
            assert_eq!(accel.invoke_on_device(device, inputs).unwrap(), expected);
        }
    }
    assert_eq!(
        accel.invoke_on_device(0, &cases[1]).unwrap().domain_error(),
        Some(DomainError::DivideByZero)
    );
}

#[test]
fn test_slots_released_after_launch() {
    let devices = Arc::new(HostEmulatedDevices::new(1));
    let generator = generator(&devices, false);
    let options = CompilationOptions::accelerator().with_hoist_literals(true);
    let compiled = generator.compile(&Expr::literal(Datum::Double(2.5)), true, &options).unwrap();
    let native = generator.generate_native_code(&compiled, &options).unwrap();

    let result = native.invoke_on_device(0, &compiled.literal_values()).unwrap();
    assert_eq!(result.value, Datum::Double(2.5));
    assert_eq!(devices.live_allocations(0), 0);
    assert_eq!(devices.loaded_kernels(0), 1);

    drop(native);
    assert_eq!(devices.loaded_kernels(0), 0);
}

#[test]
fn test_zero_devices() {
    let devices = Arc::new(HostEmulatedDevices::new(0));
    let generator = generator(&devices, true);
    let options = CompilationOptions::accelerator();
    let compiled = generator.compile(&Expr::literal(Datum::Int(1)), true, &options).unwrap();
    let err = generator.generate_native_code(&compiled, &options).unwrap_err();
    assert!(matches!(err, CodegenError::DeviceBackend(_)));
}

#[test]
fn test_device_target_failure_is_reported() {
    let targets = vec![
        DeviceTarget::host("gpu0"),
        DeviceTarget::host("gpu1").with_isa_flag("not_a_real_flag", "true"),
    ];
    let devices = Arc::new(HostEmulatedDevices::with_targets(targets));
    let generator = generator(&devices, true);
    let options = CompilationOptions::accelerator();
    let compiled = generator.compile(&Expr::literal(Datum::Int(1)), true, &options).unwrap();
    let err = generator.generate_native_code(&compiled, &options).unwrap_err();
    assert!(matches!(err, CodegenError::DeviceBackend(ref msg) if msg.contains("gpu1")));
    assert_eq!(devices.loaded_kernels(0), 0);
}

#[test]
fn test_foreign_instruction_set_is_rejected() {
    let triple = if cfg!(target_arch = "x86_64") { "aarch64-unknown-linux-gnu" } else { "x86_64-unknown-linux-gnu" };
    let foreign = DeviceTarget { triple: triple.parse().unwrap(), ..DeviceTarget::host("remote0") };
    let devices = Arc::new(HostEmulatedDevices::with_targets(vec![DeviceTarget::host("gpu0"), foreign]));
    for parallel in [false, true] {
        let generator = generator(&devices, parallel);
        let options = CompilationOptions::accelerator();
        let compiled = generator.compile(&Expr::literal(Datum::Int(1)), true, &options).unwrap();
        let err = generator.generate_native_code(&compiled, &options).unwrap_err();
        assert!(matches!(err, CodegenError::DeviceBackend(ref msg) if msg.contains("remote0")), "{}", err);
        assert_eq!(devices.loaded_kernels(0), 0);
        assert_eq!(devices.loaded_kernels(1), 0);
    }
}
