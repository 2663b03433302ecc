//! Reed-Solomon decoder over GF(2^8), derived from Phil Karn's libfec.
//! The DAB+ superframe uses RS(120,110), realised as RS(255,245) with 135
//! leading pad symbols as the standard prescribes.

/// Marker for log(0) in index form.
const A0_OFFSET: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReedSolomonConfigError {
    InvalidSymbolSize,
    InvalidFirstConsecutiveRoot,
    InvalidPrimitiveElement,
    InvalidRootCount,
    InvalidPadding,
    FieldGeneratorNotPrimitive,
}

/// Reed-Solomon codec control block. Immutable once constructed; decode
/// scratch lives on the stack of each call so one instance can be shared.
pub struct ReedSolomon {
    /// Symbols per full block, (1 << symsize) - 1.
    nn: usize,
    /// Log lookup table.
    alpha_to: Vec<u8>,
    /// Antilog lookup table, with index A0 marking log(zero).
    index_of: Vec<usize>,
    /// Generator polynomial in index form.
    genpoly: Vec<usize>,
    /// Number of generator roots = number of parity symbols.
    nroots: usize,
    /// First consecutive root, index form.
    fcr: usize,
    /// Primitive element, index form.
    prim: usize,
    /// prim-th root of 1, index form.
    iprim: usize,
    /// Padding symbols in a shortened block.
    pad: usize,
}

impl ReedSolomon {
    pub fn new(
        symsize: usize,
        gfpoly: usize,
        fcr: usize,
        prim: usize,
        nroots: usize,
        pad: usize,
    ) -> Result<Self, ReedSolomonConfigError> {
        if symsize == 0 || symsize > 8 {
            return Err(ReedSolomonConfigError::InvalidSymbolSize);
        }
        let nn = (1usize << symsize) - 1;
        if fcr >= (1 << symsize) {
            return Err(ReedSolomonConfigError::InvalidFirstConsecutiveRoot);
        }
        if prim == 0 || prim >= (1 << symsize) {
            return Err(ReedSolomonConfigError::InvalidPrimitiveElement);
        }
        if nroots >= (1 << symsize) {
            return Err(ReedSolomonConfigError::InvalidRootCount);
        }
        if pad >= nn - nroots {
            return Err(ReedSolomonConfigError::InvalidPadding);
        }

        let a0 = nn + A0_OFFSET;
        let mut alpha_to = vec![0u8; nn + 1];
        let mut index_of = vec![0usize; nn + 1];

        // generate the Galois field lookup tables
        index_of[0] = a0;
        alpha_to[a0] = 0;
        let mut sr = 1usize;
        for i in 0..nn {
            index_of[sr] = i;
            alpha_to[i] = sr as u8;
            sr <<= 1;
            if sr & (1 << symsize) != 0 {
                sr ^= gfpoly;
            }
            sr &= nn;
        }
        if sr != 1 {
            return Err(ReedSolomonConfigError::FieldGeneratorNotPrimitive);
        }

        // find prim-th root of 1, used in decoding
        let mut iprim = 1usize;
        while iprim % prim != 0 {
            iprim += nn;
        }
        iprim /= prim;

        // form the generator polynomial from its roots
        let modnn = |mut x: usize| {
            while x >= nn {
                x -= nn;
            }
            x
        };
        let mut genpoly_poly = vec![0usize; nroots + 1];
        genpoly_poly[0] = 1;
        let mut root = fcr * prim;
        for i in 0..nroots {
            genpoly_poly[i + 1] = 1;
            // multiply genpoly by (x + alpha**root)
            for j in (1..=i).rev() {
                if genpoly_poly[j] != 0 {
                    genpoly_poly[j] = genpoly_poly[j - 1]
                        ^ (alpha_to[modnn(index_of[genpoly_poly[j]] + root)] as usize);
                } else {
                    genpoly_poly[j] = genpoly_poly[j - 1];
                }
            }
            genpoly_poly[0] = alpha_to[modnn(index_of[genpoly_poly[0]] + root)] as usize;
            root += prim;
        }
        // convert to index form for quicker encoding
        let genpoly = genpoly_poly.iter().map(|&x| index_of[x]).collect();

        Ok(Self {
            nn,
            alpha_to,
            index_of,
            genpoly,
            nroots,
            fcr,
            prim,
            iprim,
            pad,
        })
    }

    /// Number of data symbols in the shortened block.
    pub fn message_length(&self) -> usize {
        self.nn - self.pad
    }

    pub fn data_length(&self) -> usize {
        self.nn - self.pad - self.nroots
    }

    #[inline(always)]
    fn modnn(&self, mut x: usize) -> usize {
        while x >= self.nn {
            x -= self.nn;
        }
        x
    }

    #[inline(always)]
    fn a0(&self) -> usize {
        self.nn + A0_OFFSET
    }

    /// Computes the parity symbols over `data` (length data_length) into
    /// `parity` (length nroots).
    pub fn encode(&self, data: &[u8], parity: &mut [u8]) {
        assert!(data.len() == self.data_length());
        assert!(parity.len() == self.nroots);
        let a0 = self.a0();

        parity.fill(0);
        for &byte in data {
            let feedback = self.index_of[(byte ^ parity[0]) as usize];
            if feedback != a0 {
                for j in 1..self.nroots {
                    parity[j] ^= self.alpha_to[self.modnn(feedback + self.genpoly[self.nroots - j])];
                }
            }
            parity.copy_within(1.., 0);
            parity[self.nroots - 1] = if feedback != a0 {
                self.alpha_to[self.modnn(feedback + self.genpoly[0])]
            } else {
                0
            };
        }
    }

    /// Corrects errors in place over a shortened block of
    /// `message_length()` symbols (data followed by parity).
    /// Returns the corrected error positions, or None when the block is
    /// uncorrectable.
    pub fn decode(&self, data: &mut [u8]) -> Option<Vec<usize>> {
        assert!(data.len() == self.message_length());
        let nroots = self.nroots;
        let a0 = self.a0();

        // form the syndromes: evaluate data(x) at the roots of g(x)
        let mut s = vec![0usize; nroots];
        for item in s.iter_mut() {
            *item = data[0] as usize;
        }
        for &byte in data.iter().skip(1) {
            for (i, item) in s.iter_mut().enumerate() {
                if *item == 0 {
                    *item = byte as usize;
                } else {
                    *item = (byte as usize)
                        ^ (self.alpha_to[self.modnn(self.index_of[*item] + (self.fcr + i) * self.prim)]
                            as usize);
                }
            }
        }

        // convert syndromes to index form, checking for the all-zero case
        let mut syn_error = 0usize;
        for item in s.iter_mut() {
            syn_error |= *item;
            *item = self.index_of[*item];
        }
        if syn_error == 0 {
            // data is already a codeword
            return Some(Vec::new());
        }

        // Berlekamp-Massey: find the error locator polynomial lambda(x)
        let mut lambda = vec![0usize; nroots + 1];
        lambda[0] = 1;
        let mut b: Vec<usize> = lambda.iter().map(|&x| self.index_of[x]).collect();
        let mut t = vec![0usize; nroots + 1];

        let mut el = 0usize;
        for r in 1..=nroots {
            // compute discrepancy at the r-th step in poly form
            let mut discr_r = 0usize;
            for i in 0..r {
                if lambda[i] != 0 && s[r - i - 1] != a0 {
                    discr_r ^= self.alpha_to[self.modnn(self.index_of[lambda[i]] + s[r - i - 1])] as usize;
                }
            }
            let discr_r = self.index_of[discr_r];
            if discr_r == a0 {
                // B(x) <-- x*B(x)
                b.copy_within(0..nroots, 1);
                b[0] = a0;
            } else {
                // T(x) <-- lambda(x) - discr_r*x*b(x)
                t[0] = lambda[0];
                for i in 0..nroots {
                    if b[i] != a0 {
                        t[i + 1] = lambda[i + 1] ^ (self.alpha_to[self.modnn(discr_r + b[i])] as usize);
                    } else {
                        t[i + 1] = lambda[i + 1];
                    }
                }
                if 2 * el <= r - 1 {
                    el = r - el;
                    // B(x) <-- inv(discr_r) * lambda(x)
                    for i in 0..=nroots {
                        b[i] = if lambda[i] == 0 {
                            a0
                        } else {
                            self.modnn(self.index_of[lambda[i]] + self.nn - discr_r)
                        };
                    }
                } else {
                    // B(x) <-- x*B(x)
                    b.copy_within(0..nroots, 1);
                    b[0] = a0;
                }
                lambda.copy_from_slice(&t);
            }
        }

        // convert lambda to index form and compute its degree
        let mut deg_lambda = 0usize;
        for (i, value) in lambda.iter_mut().enumerate() {
            *value = self.index_of[*value];
            if *value != a0 {
                deg_lambda = i;
            }
        }

        // Chien search for the roots of lambda(x)
        let mut reg = vec![a0; nroots + 1];
        reg[1..=nroots].copy_from_slice(&lambda[1..=nroots]);
        let mut roots = Vec::with_capacity(nroots);
        let mut locations = Vec::with_capacity(nroots);
        let mut k = self.iprim - 1;
        for i in 1..=self.nn {
            let mut q = 1usize; // lambda[0] is always 1
            for j in (1..=deg_lambda).rev() {
                if reg[j] != a0 {
                    reg[j] = self.modnn(reg[j] + j);
                    q ^= self.alpha_to[reg[j]] as usize;
                }
            }
            if q == 0 {
                roots.push(i);
                locations.push(k);
                if roots.len() == deg_lambda {
                    break;
                }
            }
            k = self.modnn(k + self.iprim);
        }

        if deg_lambda != roots.len() {
            // deg(lambda) unequal to number of roots: uncorrectable
            return None;
        }

        // omega(x) = s(x)*lambda(x) mod x**nroots, in index form
        let deg_omega = deg_lambda - 1;
        let mut omega = vec![a0; nroots + 1];
        for i in 0..=deg_omega {
            let mut tmp = 0usize;
            for j in (0..=i).rev() {
                if s[i - j] != a0 && lambda[j] != a0 {
                    tmp ^= self.alpha_to[self.modnn(s[i - j] + lambda[j])] as usize;
                }
            }
            omega[i] = self.index_of[tmp];
        }

        // Forney: compute error values and apply the corrections
        let mut error_positions = Vec::with_capacity(roots.len());
        for j in (0..roots.len()).rev() {
            let mut num1 = 0usize;
            for i in (0..=deg_omega).rev() {
                if omega[i] != a0 {
                    num1 ^= self.alpha_to[self.modnn(omega[i] + i * roots[j])] as usize;
                }
            }
            let num2 = self.alpha_to[self.modnn(roots[j] * (self.fcr + self.nn - 1) + self.nn)] as usize;
            let mut den = 0usize;
            // lambda[i+1] for even i is the formal derivative of lambda
            let mut i = usize::min(deg_lambda, nroots - 1) & !1usize;
            loop {
                if lambda[i + 1] != a0 {
                    den ^= self.alpha_to[self.modnn(lambda[i + 1] + i * roots[j])] as usize;
                }
                if i < 2 {
                    break;
                }
                i -= 2;
            }
            if den == 0 {
                return None;
            }

            if num1 != 0 && locations[j] >= self.pad {
                let position = locations[j] - self.pad;
                let error = self.alpha_to
                    [self.modnn(self.index_of[num1] + self.index_of[num2] + self.nn - self.index_of[den])];
                data[position] ^= error;
                error_positions.push(position);
            }
        }
        Some(error_positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// DOC: ETSI TS 102 563, clause 6
    /// G(x) = x^8 + x^4 + x^3 + x^2 + 1; RS(120,110) via RS(255,245).
    fn dab_reed_solomon() -> ReedSolomon {
        ReedSolomon::new(8, 0b1_0001_1101, 0, 1, 10, 135).unwrap()
    }

    fn codeword(rs: &ReedSolomon) -> Vec<u8> {
        let data: Vec<u8> = (0..rs.data_length()).map(|i| (i * 83 + 17) as u8).collect();
        let mut parity = vec![0u8; 10];
        rs.encode(&data, &mut parity);
        let mut block = data;
        block.extend_from_slice(&parity);
        block
    }

    #[test]
    fn dab_parameters_shorten_to_120_110() {
        let rs = dab_reed_solomon();
        assert_eq!(rs.message_length(), 120);
        assert_eq!(rs.data_length(), 110);
    }

    #[test]
    fn clean_codeword_passes_through() {
        let rs = dab_reed_solomon();
        let block = codeword(&rs);
        let mut received = block.clone();
        let corrections = rs.decode(&mut received).unwrap();
        assert!(corrections.is_empty());
        assert_eq!(received, block);
    }

    #[test]
    fn corrects_up_to_five_byte_errors() {
        let rs = dab_reed_solomon();
        let block = codeword(&rs);
        for total_errors in 1..=5usize {
            let mut received = block.clone();
            for e in 0..total_errors {
                let position = e * 23 + 7;
                received[position] ^= 0x5A;
            }
            let corrections = rs.decode(&mut received).unwrap();
            assert_eq!(corrections.len(), total_errors);
            assert_eq!(received, block, "with {} errors", total_errors);
        }
    }

    #[test]
    fn reports_uncorrectable_blocks() {
        let rs = dab_reed_solomon();
        let block = codeword(&rs);
        let mut received = block.clone();
        // t = 5 for 10 parity symbols; 8 spread errors exceed it
        for e in 0..8usize {
            received[e * 13 + 2] ^= 0xA7;
        }
        // either detected as uncorrectable or miscorrected to a different
        // codeword; it must never silently return the original data claim
        match rs.decode(&mut received) {
            None => {}
            Some(_) => assert_ne!(received, block),
        }
    }

    #[test]
    fn rejects_non_primitive_field_polynomial() {
        assert_eq!(
            ReedSolomon::new(8, 0b1_0000_0011, 0, 1, 10, 135).err(),
            Some(ReedSolomonConfigError::FieldGeneratorNotPrimitive)
        );
    }
}
