//! Combinational crossbar.
//!
//! Each output names the input it reads from. An output is valid only when
//! both its source selection and the selected input are valid; otherwise it
//! carries `T::default()`.

/// Route `data_in` to outputs according to `source`.
///
/// Returns `(data_out, valid_out)`, one entry per output.
pub fn crossbar<T: Clone + Default>(
    data_in: &[T],
    valid_in: &[bool],
    source: &[usize],
    valid_src: &[bool],
) -> (Vec<T>, Vec<bool>) {
    assert_eq!(data_in.len(), valid_in.len(), "crossbar: input width mismatch");
    assert_eq!(source.len(), valid_src.len(), "crossbar: output width mismatch");

    let mut data_out = vec![T::default(); source.len()];
    let mut valid_out = vec![false; source.len()];

    for (o, (&src, &sel)) in source.iter().zip(valid_src).enumerate() {
        if !sel {
            continue;
        }
        assert!(
            src < data_in.len(),
            "crossbar: output {} selects input {} of {}",
            o,
            src,
            data_in.len()
        );
        if valid_in[src] {
            data_out[o] = data_in[src].clone();
            valid_out[o] = true;
        }
    }

    (data_out, valid_out)
}

/// Crossbar without input valids: every selected input is taken as valid.
pub fn crossbar_select<T: Clone + Default>(data_in: &[T], source: &[usize], valid_src: &[bool]) -> Vec<T> {
    let valid_in = vec![true; data_in.len()];
    crossbar(data_in, &valid_in, source, valid_src).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossbar_routes_and_zeroes() {
        let data = [10u32, 20, 30];
        let valid = [true, false, true];
        let (out, v) = crossbar(&data, &valid, &[2, 1, 0, 2], &[true, true, true, false]);
        assert_eq!(out, vec![30, 0, 10, 0]);
        assert_eq!(v, vec![true, false, true, false]);
    }

    #[test]
    fn test_crossbar_broadcast() {
        let out = crossbar_select(&[7u8, 9], &[1, 1, 1], &[true; 3]);
        assert_eq!(out, vec![9, 9, 9]);
    }

    #[test]
    fn test_valid_out_implies_match() {
        let data: Vec<u16> = (0..4).map(|i| i * 3 + 1).collect();
        for mask in 0..16u32 {
            let valid: Vec<bool> = (0..4).map(|i| (mask >> i) & 1 == 1).collect();
            let source = [3, 2, 1, 0];
            let (out, v) = crossbar(&data, &valid, &source, &[true; 4]);
            for o in 0..4 {
                if v[o] {
                    assert_eq!(out[o], data[source[o]]);
                } else {
                    assert_eq!(out[o], 0);
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "selects input 5")]
    fn test_out_of_range_source_panics() {
        crossbar(&[1u8, 2], &[true, true], &[5], &[true]);
    }
}
