use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use kinfit::constants::{BEAM_ENERGY_SIGMA, MASS_PROTON};
use kinfit::four_momentum::LorentzVec;
use kinfit::uncertainty_models::ConstantSigmas;
use kinfit::{Candidate, Detector, KinFitter};

struct TrueEvent {
    beam_e: f64,
    proton: LorentzVec,
    photons: [LorentzVec; 2],
}

/// Exactly closed beam + p → p γγ event with an off-axis recoil.
///
/// The photon energies and polar angles are free parameters; the beam energy
/// that puts the missing four-vector on the proton mass shell follows
/// linearly from closure.
fn closed_event(e1: f64, t1: f64, e2: f64, t2: f64) -> TrueEvent {
    let es = e1 + e2;
    let pzs = e1 * t1.cos() + e2 * t2.cos();
    let pt = e1 * t1.sin() - e2 * t2.sin();
    let amb = MASS_PROTON - es + pzs;
    let apb = MASS_PROTON - es - pzs;
    let beam_e = (MASS_PROTON * MASS_PROTON + pt * pt - amb * apb) / (2.0 * amb);

    let proton = LorentzVec::new(
        nalgebra::Vector3::new(-pt, 0.0, beam_e - pzs),
        beam_e + MASS_PROTON - es,
    );
    let photons = [
        LorentzVec::from_e_mass_angles(e1, 0.0, t1, 0.0),
        LorentzVec::from_e_mass_angles(e2, 0.0, t2, std::f64::consts::PI),
    ];
    TrueEvent {
        beam_e,
        proton,
        photons,
    }
}

fn sample_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

/// Smear a large sample of exactly closed events with the model's own sigmas
/// and check that the ensemble behaves: chi2 averages its degree count, the
/// probability tail is flat, pulls center on zero, and the fitted photon
/// energies beat the measured ones against the generated truth.
#[test]
fn test_ensemble_statistics_of_smeared_events() {
    let model = ConstantSigmas::mc_long_target();
    let mut fitter = KinFitter::new(Some(Arc::new(model.clone())), false);
    let mut rng = StdRng::seed_from_u64(0x0420_1BD5);
    let gauss = Normal::new(0.0, 1.0).unwrap();

    let photon_s = model.photon_barrel;
    let proton_s = model.proton_barrel;

    let n_events = 300;
    let mut pulls = Vec::new();
    let mut chi2_sum = 0.0;
    let mut low_p = 0usize;
    let mut err_fitted = 0.0;
    let mut err_measured = 0.0;

    for _ in 0..n_events {
        // The generation windows keep the recoil well off the beam axis so
        // its smeared polar angle stays positive.
        let e1 = rng.random_range(180.0..240.0);
        let t1 = rng.random_range(0.8..1.1);
        let e2 = rng.random_range(100.0..130.0);
        let t2 = rng.random_range(0.4..0.6);
        let ev = closed_event(e1, t1, e2, t2);

        let beam_meas = ev.beam_e + BEAM_ENERGY_SIGMA * gauss.sample(&mut rng);
        let photons: Vec<Candidate> = ev
            .photons
            .iter()
            .map(|lv| {
                Candidate::new(
                    lv.e + photon_s.sigma_ek * gauss.sample(&mut rng),
                    lv.theta() + photon_s.sigma_theta * gauss.sample(&mut rng),
                    lv.phi() + photon_s.sigma_phi * gauss.sample(&mut rng),
                    Detector::Barrel,
                )
            })
            .collect();
        // Proton kinetic energy is unmeasured in this calibration; only its
        // angles carry noise.
        let proton = Candidate::new(
            ev.proton.ek(MASS_PROTON),
            ev.proton.theta() + proton_s.sigma_theta * gauss.sample(&mut rng),
            ev.proton.phi() + proton_s.sigma_phi * gauss.sample(&mut rng),
            Detector::Barrel,
        );

        let result = fitter.do_fit(beam_meas, &proton, &photons).unwrap();
        assert!(result.is_success(), "{result}");
        assert_eq!(result.n_dof, 3);

        chi2_sum += result.chi2;
        if result.probability < 0.05 {
            low_p += 1;
        }
        pulls.push(result.beam_pull);
        for p in result.photons() {
            pulls.extend(p.pulls);
        }
        let recoil = result.proton().unwrap();
        pulls.push(recoil.pulls[1]);
        pulls.push(recoil.pulls[2]);

        for ((fitted, cand), true_lv) in result.photons().zip(&photons).zip(&ev.photons) {
            err_fitted += (fitted.lv.e - true_lv.e) * (fitted.lv.e - true_lv.e);
            err_measured += (cand.ek - true_lv.e) * (cand.ek - true_lv.e);
        }
    }

    // ---------- chi2 behaves like chi2 with 3 degrees of freedom ----------
    let chi2_mean = chi2_sum / n_events as f64;
    assert!(
        (2.5..3.7).contains(&chi2_mean),
        "mean chi2 = {chi2_mean}"
    );
    let low_frac = low_p as f64 / n_events as f64;
    assert!(
        (0.01..0.12).contains(&low_frac),
        "P < 0.05 fraction = {low_frac}"
    );

    // ---------- pulls center on zero with sub-unit spread ----------
    assert!(pulls.iter().all(|p| p.is_finite()));
    let (mean, std) = sample_std(&pulls);
    assert!(mean.abs() < 0.12, "pull mean = {mean}");
    assert!((0.25..1.05).contains(&std), "pull std = {std}");

    // ---------- the fit improves on the raw measurement ----------
    assert!(
        err_fitted < err_measured,
        "fitted {err_fitted} vs measured {err_measured}"
    );
}
