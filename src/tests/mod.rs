mod test_stamper_random;
mod test_force_saturation;
mod test_trilateration_random;
