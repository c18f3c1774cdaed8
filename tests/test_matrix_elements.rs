use approx::assert_relative_eq;
use boltzmann_collision::matrix_element::{
    parse_matrix_element_file, MatrixElement, MatrixElementError,
};
use boltzmann_collision::model_parameters::ModelParameters;
use std::path::PathBuf;

fn params_with(entries: &[(&str, f64)]) -> ModelParameters {
    let mut params = ModelParameters::new();
    for (name, value) in entries {
        params.define(*name, *value).unwrap();
    }
    params
}

fn write_temp_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("bc_me_{}_{}", std::process::id(), name));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_arithmetic_precedence() {
    let params = ModelParameters::new();
    let mut element = MatrixElement::parse("2 + 3*4", &params).unwrap();
    assert_relative_eq!(element.evaluate(0.0, 0.0, 0.0), 14.0);

    let mut element = MatrixElement::parse("(2 + 3)*4", &params).unwrap();
    assert_relative_eq!(element.evaluate(0.0, 0.0, 0.0), 20.0);

    // right-associative exponentiation
    let mut element = MatrixElement::parse("2^3^2", &params).unwrap();
    assert_relative_eq!(element.evaluate(0.0, 0.0, 0.0), 512.0);

    // unary minus binds below the power
    let mut element = MatrixElement::parse("-2^2", &params).unwrap();
    assert_relative_eq!(element.evaluate(0.0, 0.0, 0.0), -4.0);

    let mut element = MatrixElement::parse("1e-2 + 2E3", &params).unwrap();
    assert_relative_eq!(element.evaluate(0.0, 0.0, 0.0), 2000.01);
}

#[test]
fn test_mandelstam_variables() {
    let params = ModelParameters::new();
    let mut element = MatrixElement::parse("s*t/u", &params).unwrap();
    assert_relative_eq!(element.evaluate(2.0, 3.0, 4.0), 1.5);

    let mut element = MatrixElement::parse("s^2 + t^2 - 2*u", &params).unwrap();
    assert_relative_eq!(element.evaluate(1.0, 2.0, 3.0), -1.0);
}

#[test]
fn test_bound_parameters() {
    let params = params_with(&[("gs", 1.2), ("msq", 0.25)]);
    let mut element = MatrixElement::parse("gs^4 * (s + msq)", &params).unwrap();
    assert_relative_eq!(
        element.evaluate(2.0, 0.0, 0.0),
        1.2f64.powi(4) * 2.25,
        epsilon = 1e-14
    );
}

#[test]
fn test_undeclared_symbol_rejected() {
    let params = params_with(&[("gs", 1.2)]);
    let result = MatrixElement::parse("gs * yt", &params);
    assert!(result.is_err());
}

#[test]
fn test_malformed_expressions_rejected() {
    let params = ModelParameters::new();
    for expr in ["2 +", "* 3", "(2", "2)", "", "2 3", "s t"] {
        assert!(
            MatrixElement::parse(expr, &params).is_err(),
            "'{}' should not parse",
            expr
        );
    }
}

#[test]
fn test_parameter_rebinding() {
    let mut params = params_with(&[("gs", 1.0)]);
    let mut element = MatrixElement::parse("gs^2", &params).unwrap();
    assert_relative_eq!(element.evaluate(0.0, 0.0, 0.0), 1.0);

    params.set("gs", 3.0).unwrap();
    element.refresh_parameters(&params);
    assert_relative_eq!(element.evaluate(0.0, 0.0, 0.0), 9.0);
}

#[test]
fn test_idempotent_assignment_does_not_rebind() {
    let mut params = params_with(&[("gs", 1.5)]);
    let element = MatrixElement::parse("gs", &params).unwrap();
    let bound_revision = element.parameters_revision();

    // assigning the stored value leaves the revision untouched
    let changed = params.set("gs", 1.5).unwrap();
    assert!(!changed);
    assert_eq!(params.revision(), bound_revision);

    let changed = params.set("gs", 2.0).unwrap();
    assert!(changed);
    assert!(params.revision() > bound_revision);
}

#[test]
fn test_file_parsing() {
    let params = params_with(&[("gs", 1.2)]);
    let path = write_temp_file(
        "ok.txt",
        "# quark-gluon matrix elements\n\
         \n\
         M[0,1,0,1] -> gs^4        # t-channel\n\
         M[0,0,1,1] -> 2*gs^4 * s/t\n",
    );
    let parsed = parse_matrix_element_file(&path, &params, 2).unwrap();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].particle_indices, [0, 1, 0, 1]);
    assert_eq!(parsed[0].line_number, 3);
    assert_eq!(parsed[1].particle_indices, [0, 0, 1, 1]);
    assert_eq!(parsed[1].line_number, 4);

    let mut element = parsed[0].matrix_element.clone();
    assert_relative_eq!(
        element.evaluate(1.0, 1.0, 1.0),
        1.2f64.powi(4),
        epsilon = 1e-14
    );
}

#[test]
fn test_file_parse_error_reports_line() {
    let params = ModelParameters::new();
    let path = write_temp_file("bad_header.txt", "# fine\nM[0,1] -> 1\n");
    let result = parse_matrix_element_file(&path, &params, 2);
    assert!(matches!(
        result,
        Err(MatrixElementError::Parse { line: 2, .. })
    ));

    let path = write_temp_file("bad_symbol.txt", "M[0,0,0,0] -> lambda\n");
    let result = parse_matrix_element_file(&path, &params, 1);
    assert!(matches!(
        result,
        Err(MatrixElementError::UnknownSymbol { line: 1, ref symbol }) if symbol == "lambda"
    ));

    let path = write_temp_file("bad_index.txt", "M[0,0,0,5] -> 1\n");
    let result = parse_matrix_element_file(&path, &params, 2);
    assert!(matches!(
        result,
        Err(MatrixElementError::InvalidParticleIndex {
            line: 1,
            index: 5,
            count: 2
        })
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let params = ModelParameters::new();
    let result = parse_matrix_element_file(
        std::path::Path::new("/definitely/not/here.txt"),
        &params,
        1,
    );
    assert!(matches!(result, Err(MatrixElementError::Io(_))));
}
